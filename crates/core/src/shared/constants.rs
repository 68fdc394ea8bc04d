pub const FACE_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const FACE_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

pub const ARCFACE_MODEL_NAME: &str = "w600k_r50.onnx";
pub const ARCFACE_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/w600k_r50.onnx";

/// Identity label for faces the store could not match.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Prefix for identities created by auto-enrollment.
pub const AUTO_ENROLL_PREFIX: &str = "User_";

/// Frame size the face-area quality term is normalized against.
pub const QUALITY_REFERENCE_WIDTH: u32 = 640;
pub const QUALITY_REFERENCE_HEIGHT: u32 = 480;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// COCO class index for "person".
pub const PERSON_CLASS_ID: usize = 0;
