use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Frame acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub frame_interval_ms: u64,
    pub queue_capacity: usize,
    pub max_display_width: u32,
    pub max_display_height: u32,
    pub retry_delay_ms: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 40,
            queue_capacity: 10,
            max_display_width: 1920,
            max_display_height: 1080,
            retry_delay_ms: 100,
        }
    }
}

/// Processing loop and entity lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub backlog_threshold: usize,
    pub dequeue_timeout_ms: u64,
    pub skip_timeout_ms: u64,
    pub idle_pause_ms: u64,
    pub error_pause_ms: u64,
    pub eviction_window_secs: f64,
    pub person_confidence: f64,
    pub progress_every: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            backlog_threshold: 5,
            dequeue_timeout_ms: 1000,
            skip_timeout_ms: 10,
            idle_pause_ms: 100,
            error_pause_ms: 100,
            eviction_window_secs: 2.0,
            person_confidence: 0.5,
            progress_every: 100,
        }
    }
}

/// Person tracker association settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub n_init: usize,
    pub max_age: usize,
    pub high_threshold: f64,
    pub match_threshold: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            n_init: 3,
            max_age: 30,
            high_threshold: 0.5,
            match_threshold: 0.3,
        }
    }
}

/// Per-person face sub-pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    pub min_face_size: u32,
    pub recognition_threshold: f64,
    pub quality_threshold: f64,
    pub auto_enroll_unknown: bool,
    pub iou_threshold: f64,
    pub overlap_threshold: f64,
    pub distance_threshold: f64,
    pub size_ratio_threshold: f64,
    pub descriptor_match_threshold: f64,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            min_face_size: 120,
            recognition_threshold: 0.6,
            quality_threshold: 100.0,
            auto_enroll_unknown: true,
            iou_threshold: 0.5,
            overlap_threshold: 0.7,
            distance_threshold: 0.3,
            size_ratio_threshold: 0.7,
            descriptor_match_threshold: 0.75,
        }
    }
}

/// Enrollment store and verifier settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub db_path: PathBuf,
    pub verify_threshold: f64,
    pub strong_match_distance: f64,
    pub early_exit_distance: f64,
    pub references_per_identity: usize,
    pub max_faces_per_identity: usize,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("Faces_db"),
            verify_threshold: 0.68,
            strong_match_distance: 0.2,
            early_exit_distance: 0.3,
            references_per_identity: 3,
            max_faces_per_identity: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub interval_ms: u64,
    pub stale_after_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            stale_after_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub join_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: 2000,
        }
    }
}

/// Top-level configuration. Every field has a default, so a partial JSON
/// file only overrides what it names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub ingestion: IngestionConfig,
    pub processing: ProcessingConfig,
    pub tracker: TrackerConfig,
    pub faces: FaceConfig,
    pub recognition: RecognitionConfig,
    pub watchdog: WatchdogConfig,
    pub shutdown: ShutdownConfig,
}

impl SystemConfig {
    /// Per-user config location: `<config_dir>/FaceTrack/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("FaceTrack").join("config.json"))
    }

    /// Loads `path`, or the per-user file when `path` is `None`.
    ///
    /// A missing per-user file yields defaults; a missing explicit path is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingestion.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be > 0".into()));
        }
        if self.ingestion.max_display_width == 0 || self.ingestion.max_display_height == 0 {
            return Err(ConfigError::Invalid(
                "display bounds must be non-zero".into(),
            ));
        }
        if self.processing.eviction_window_secs <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "eviction_window_secs must be > 0, got {}",
                self.processing.eviction_window_secs
            )));
        }
        if !(0.0..=1.0).contains(&self.processing.person_confidence) {
            return Err(ConfigError::Invalid(format!(
                "person_confidence must be between 0.0 and 1.0, got {}",
                self.processing.person_confidence
            )));
        }
        if self.tracker.n_init == 0 {
            return Err(ConfigError::Invalid("n_init must be >= 1".into()));
        }
        for (name, value) in [
            ("iou_threshold", self.faces.iou_threshold),
            ("overlap_threshold", self.faces.overlap_threshold),
            ("size_ratio_threshold", self.faces.size_ratio_threshold),
            ("descriptor_match_threshold", self.faces.descriptor_match_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between 0.0 and 1.0, got {value}"
                )));
            }
        }
        if self.recognition.max_faces_per_identity == 0 {
            return Err(ConfigError::Invalid(
                "max_faces_per_identity must be > 0".into(),
            ));
        }
        if self.recognition.references_per_identity == 0 {
            return Err(ConfigError::Invalid(
                "references_per_identity must be > 0".into(),
            ));
        }
        if self.watchdog.interval_ms == 0 {
            return Err(ConfigError::Invalid("watchdog interval must be > 0".into()));
        }
        Ok(())
    }

    pub fn eviction_window(&self) -> Duration {
        Duration::from_secs_f64(self.processing.eviction_window_secs)
    }
}
