//! On-disk enrollment store.
//!
//! Layout: `<root>/<identity>/face_<millis>_<seq>_q<quality>.jpg`. The
//! quality an image was enrolled at is kept in its file name.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use image::ImageFormat;
use thiserror::Error;

use crate::shared::constants::{AUTO_ENROLL_PREFIX, IMAGE_EXTENSIONS};
use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("enrollment store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode or decode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid identity name: {0:?}")]
    InvalidIdentity(String),
    #[error("face image must be RGB, got {0} channels")]
    UnsupportedChannels(u8),
}

/// A reference image on disk and the quality it was enrolled at.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredFace {
    pub path: PathBuf,
    pub quality: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EnrollOutcome {
    Added(PathBuf),
    Replaced { removed: PathBuf, added: PathBuf },
    /// At capacity and not better than the worst stored image.
    Rejected,
}

pub struct EnrollmentStore {
    root: PathBuf,
    seq: AtomicU64,
}

impl EnrollmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Like `new`, but creates the root directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, EnrollmentError> {
        let store = Self::new(root);
        fs::create_dir_all(&store.root).map_err(|e| io_err(&store.root, e))?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Identity folder names, sorted. A missing root has none.
    pub fn identities(&self) -> Result<Vec<String>, EnrollmentError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&self.root)
            .map_err(|e| io_err(&self.root, e))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Stored images of `identity`, lowest quality first.
    pub fn stored_faces(&self, identity: &str) -> Result<Vec<StoredFace>, EnrollmentError> {
        let dir = self.identity_dir(identity)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut faces: Vec<StoredFace> = fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_image(path))
            .map(|path| StoredFace {
                quality: quality_from_name(&path),
                path,
            })
            .collect();
        faces.sort_by(|a, b| {
            a.quality
                .partial_cmp(&b.quality)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(faces)
    }

    pub fn load_image(&self, path: &Path) -> Result<Frame, EnrollmentError> {
        let img = image::open(path).map_err(|e| EnrollmentError::Image {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Frame::from_rgb_image(img.to_rgb8(), 0))
    }

    /// Keeps at most `capacity` images per identity, raising the quality
    /// floor: at capacity the worst image is replaced only by a strictly
    /// better one.
    pub fn enroll_or_update(
        &self,
        identity: &str,
        face: &Frame,
        quality: f64,
        capacity: usize,
    ) -> Result<EnrollOutcome, EnrollmentError> {
        // Stored qualities come back from the one-decimal file name tag, so
        // the candidate is compared at that same precision.
        let quality = tagged_quality(quality);
        let existing = self.stored_faces(identity)?;
        if existing.len() < capacity {
            let added = self.save(identity, face, quality)?;
            log::info!("enrolled new face for {identity} (q: {quality:.1})");
            return Ok(EnrollOutcome::Added(added));
        }
        let Some(worst) = existing.first() else {
            return Ok(EnrollOutcome::Rejected);
        };
        if quality <= worst.quality {
            return Ok(EnrollOutcome::Rejected);
        }
        let added = self.save(identity, face, quality)?;
        fs::remove_file(&worst.path).map_err(|e| io_err(&worst.path, e))?;
        log::info!(
            "replaced face for {identity} (q: {:.1} -> {quality:.1})",
            worst.quality
        );
        Ok(EnrollOutcome::Replaced {
            removed: worst.path.clone(),
            added,
        })
    }

    /// One past the highest numeric identity (`User_<n>` or `<n>`), or 0.
    pub fn next_available_id(&self) -> u64 {
        match self.identities() {
            Ok(names) => names
                .iter()
                .filter_map(|name| parse_identity_number(name))
                .max()
                .map_or(0, |n| n + 1),
            Err(e) => {
                log::warn!("could not scan enrollment store: {e}");
                0
            }
        }
    }

    fn save(&self, identity: &str, face: &Frame, quality: f64) -> Result<PathBuf, EnrollmentError> {
        let dir = self.identity_dir(identity)?;
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let img = face
            .to_rgb_image()
            .ok_or(EnrollmentError::UnsupportedChannels(face.channels()))?;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("face_{millis}_{seq}_q{quality:.1}.jpg"));
        img.save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|e| EnrollmentError::Image {
                path: path.clone(),
                source: e,
            })?;
        Ok(path)
    }

    fn identity_dir(&self, identity: &str) -> Result<PathBuf, EnrollmentError> {
        let valid = !identity.is_empty()
            && identity != "."
            && identity != ".."
            && !identity.contains(['/', '\\']);
        if !valid {
            return Err(EnrollmentError::InvalidIdentity(identity.to_string()));
        }
        Ok(self.root.join(identity))
    }
}

fn io_err(path: &Path, source: std::io::Error) -> EnrollmentError {
    EnrollmentError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// `face_..._q123.4.jpg` -> 123.4; anything unparseable counts as 0.
fn quality_from_name(path: &Path) -> f64 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.rsplit_once("_q"))
        .and_then(|(_, q)| q.parse::<f64>().ok())
        .filter(|q| q.is_finite())
        .unwrap_or(0.0)
}

/// `quality` as it reads back from a file name tag.
fn tagged_quality(quality: f64) -> f64 {
    format!("{quality:.1}").parse().unwrap_or(quality)
}

fn parse_identity_number(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(AUTO_ENROLL_PREFIX).unwrap_or(name);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn face(value: u8) -> Frame {
        Frame::new(vec![value; 16 * 16 * 3], 16, 16, 3, 0)
    }

    #[test]
    fn test_next_id_after_highest_numeric_identity() {
        let tmp = TempDir::new().unwrap();
        for name in ["User_0", "2", "User_5", "alice", "User_x"] {
            fs::create_dir_all(tmp.path().join(name)).unwrap();
        }
        assert_eq!(EnrollmentStore::new(tmp.path()).next_available_id(), 6);
    }

    #[test]
    fn test_next_id_empty_store_is_zero() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(EnrollmentStore::new(tmp.path()).next_available_id(), 0);
    }

    #[test]
    fn test_next_id_missing_store_is_zero() {
        let tmp = TempDir::new().unwrap();
        let store = EnrollmentStore::new(tmp.path().join("nope"));
        assert_eq!(store.next_available_id(), 0);
    }

    #[test]
    fn test_files_do_not_count_as_identities() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("7"), b"not a dir").unwrap();
        let store = EnrollmentStore::new(tmp.path());
        assert!(store.identities().unwrap().is_empty());
        assert_eq!(store.next_available_id(), 0);
    }

    #[rstest]
    #[case("User_12", Some(12))]
    #[case("3", Some(3))]
    #[case("User_", None)]
    #[case("User_1a", None)]
    #[case("bob", None)]
    fn test_parse_identity_number(#[case] name: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_identity_number(name), expected);
    }

    #[rstest]
    #[case("face_1_0_q123.4.jpg", 123.4)]
    #[case("face_1_0_q80.png", 80.0)]
    #[case("reference.jpg", 0.0)]
    #[case("face_q_bad.jpg", 0.0)]
    fn test_quality_from_name(#[case] name: &str, #[case] expected: f64) {
        assert_eq!(quality_from_name(Path::new(name)), expected);
    }

    #[test]
    fn test_enroll_below_capacity_adds() {
        let tmp = TempDir::new().unwrap();
        let store = EnrollmentStore::new(tmp.path());
        for q in [10.0, 20.0, 30.0] {
            let outcome = store.enroll_or_update("alice", &face(100), q, 3).unwrap();
            assert!(matches!(outcome, EnrollOutcome::Added(_)));
        }
        let qualities: Vec<f64> = store
            .stored_faces("alice")
            .unwrap()
            .iter()
            .map(|f| f.quality)
            .collect();
        assert_eq!(qualities, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_enroll_at_capacity_replaces_lowest_only_when_strictly_better() {
        let tmp = TempDir::new().unwrap();
        let store = EnrollmentStore::new(tmp.path());
        store.enroll_or_update("bob", &face(1), 50.0, 2).unwrap();
        store.enroll_or_update("bob", &face(2), 70.0, 2).unwrap();

        let equal = store.enroll_or_update("bob", &face(3), 50.0, 2).unwrap();
        assert_eq!(equal, EnrollOutcome::Rejected);

        let better = store.enroll_or_update("bob", &face(4), 60.0, 2).unwrap();
        assert!(matches!(better, EnrollOutcome::Replaced { .. }));

        let qualities: Vec<f64> = store
            .stored_faces("bob")
            .unwrap()
            .iter()
            .map(|f| f.quality)
            .collect();
        assert_eq!(qualities, vec![60.0, 70.0]);
    }

    #[test]
    fn test_capacity_check_uses_tagged_precision() {
        let tmp = TempDir::new().unwrap();
        let store = EnrollmentStore::new(tmp.path());
        store.enroll_or_update("gina", &face(10), 50.04, 1).unwrap();
        assert_eq!(store.stored_faces("gina").unwrap()[0].quality, 50.0);

        // 50.02 is higher than 50.04's tag but equal at one decimal
        assert_eq!(
            store.enroll_or_update("gina", &face(20), 50.02, 1).unwrap(),
            EnrollOutcome::Rejected
        );
        let outcome = store.enroll_or_update("gina", &face(30), 50.06, 1).unwrap();
        assert!(matches!(outcome, EnrollOutcome::Replaced { .. }));
        assert_eq!(store.stored_faces("gina").unwrap()[0].quality, 50.1);
    }

    #[rstest]
    #[case(50.04, 50.0)]
    #[case(50.06, 50.1)]
    #[case(7.0, 7.0)]
    fn test_tagged_quality(#[case] quality: f64, #[case] expected: f64) {
        assert_eq!(tagged_quality(quality), expected);
    }

    #[test]
    fn test_saved_image_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = EnrollmentStore::new(tmp.path());
        let EnrollOutcome::Added(path) = store.enroll_or_update("carol", &face(200), 5.0, 10).unwrap()
        else {
            panic!("expected an added image");
        };
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("_q5.0.jpg"));
        let loaded = store.load_image(&path).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (16, 16));
        assert!((loaded.data()[0] as i32 - 200).abs() <= 2);
    }

    #[test]
    fn test_rejects_path_like_identity() {
        let tmp = TempDir::new().unwrap();
        let store = EnrollmentStore::new(tmp.path());
        assert!(matches!(
            store.enroll_or_update("../escape", &face(1), 1.0, 10),
            Err(EnrollmentError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_non_images_are_ignored() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("dave")).unwrap();
        fs::write(tmp.path().join("dave").join("notes.txt"), b"hi").unwrap();
        let store = EnrollmentStore::new(tmp.path());
        assert!(store.stored_faces("dave").unwrap().is_empty());
    }
}
