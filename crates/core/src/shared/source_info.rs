/// Properties of an opened video source, as reported at open time.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceInfo {
    /// Native frame width before any display downscale.
    pub width: u32,
    pub height: u32,
    /// Nominal rate; 0.0 when the container does not report one.
    pub fps: f64,
    /// Human-readable locator (file path, URL or device).
    pub locator: String,
}

impl SourceInfo {
    pub fn is_live(&self) -> bool {
        self.locator.starts_with("rtsp://")
            || self.locator.starts_with("rtmp://")
            || self.locator.starts_with("/dev/video")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(locator: &str) -> SourceInfo {
        SourceInfo {
            width: 1280,
            height: 720,
            fps: 25.0,
            locator: locator.to_string(),
        }
    }

    #[test]
    fn test_stream_urls_are_live() {
        assert!(info("rtsp://cam.local/stream").is_live());
        assert!(info("/dev/video0").is_live());
    }

    #[test]
    fn test_files_are_not_live() {
        assert!(!info("/tmp/clip.mp4").is_live());
    }
}
