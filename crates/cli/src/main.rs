use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use clap::Parser;

use facetrack_core::detection::infrastructure::bytetrack_tracker::ByteTracker;
use facetrack_core::detection::infrastructure::onnx_person_detector::OnnxPersonDetector;
use facetrack_core::detection::infrastructure::onnx_reid_embedder::OnnxReidEmbedder;
use facetrack_core::pipeline::detection_system::{DetectionSystem, Models};
use facetrack_core::recognition::identity_resolver::{IdentityResolver, ResolverSettings};
use facetrack_core::recognition::infrastructure::arcface_verifier::ArcFaceVerifier;
use facetrack_core::recognition::infrastructure::enrollment_store::EnrollmentStore;
use facetrack_core::recognition::infrastructure::onnx_face_detector::{
    OnnxFaceDetector, DEFAULT_CONFIDENCE,
};
use facetrack_core::registry::entity_registry::PersonView;
use facetrack_core::shared::config::SystemConfig;
use facetrack_core::shared::constants::{
    ARCFACE_MODEL_NAME, ARCFACE_MODEL_URL, FACE_MODEL_NAME, FACE_MODEL_URL,
};
use facetrack_core::shared::model_resolver::{self, ModelSource};
use facetrack_core::video::infrastructure::ffmpeg_source::FfmpegSource;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Live person tracking with face identity linking.
#[derive(Parser)]
#[command(name = "facetrack")]
struct Cli {
    /// Video file, stream URL or capture device.
    source: String,

    /// Enrollment store directory (overrides the config file).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON config file (default: per-user config, if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// YOLO person detection model (ONNX).
    #[arg(long)]
    person_model: PathBuf,

    /// Person re-identification model (ONNX).
    #[arg(long)]
    reid_model: PathBuf,

    /// Face detection model; downloaded when omitted.
    #[arg(long)]
    face_model: Option<PathBuf>,

    /// ArcFace recognition model; downloaded when omitted.
    #[arg(long)]
    arcface_model: Option<PathBuf>,

    /// Stop after this many seconds.
    #[arg(long)]
    duration: Option<f64>,

    /// Seconds between registry summaries.
    #[arg(long, default_value = "5")]
    report_every: f64,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let mut config = SystemConfig::load(cli.config.as_deref())?;
    if let Some(db_path) = &cli.db_path {
        config.recognition.db_path = db_path.clone();
    }
    config.validate()?;

    let models = build_models(&cli, &config)?;
    let source = Box::new(FfmpegSource::new(cli.source.clone()));
    let mut system = DetectionSystem::new(config, source, models);
    system.start()?;

    let started = Instant::now();
    let run_for = cli.duration.map(Duration::from_secs_f64);
    let report_every = Duration::from_secs_f64(cli.report_every);
    let mut last_report = Instant::now();

    loop {
        std::thread::sleep(POLL_INTERVAL);
        if system.is_stopped() {
            log::warn!("Detection system stopped itself");
            break;
        }
        if run_for.is_some_and(|limit| started.elapsed() >= limit) {
            log::info!("Run duration reached");
            break;
        }
        if system.is_ingestion_finished() && system.queue_len() == 0 {
            log::info!("Source finished and queue drained");
            break;
        }
        if last_report.elapsed() >= report_every {
            report(&system.snapshot());
            last_report = Instant::now();
        }
    }

    let unfinished = system.stop();
    report(&system.snapshot());
    if !unfinished.is_empty() {
        log::warn!("Stages still running at exit: {}", unfinished.join(", "));
    }
    Ok(())
}

fn build_models(cli: &Cli, config: &SystemConfig) -> Result<Models, Box<dyn std::error::Error>> {
    let face_model = model_resolver::resolve(
        &ModelSource {
            name: FACE_MODEL_NAME,
            url: FACE_MODEL_URL,
        },
        cli.face_model.as_deref(),
        Some(Box::new(download_progress)),
    )?;
    let arcface_model = model_resolver::resolve(
        &ModelSource {
            name: ARCFACE_MODEL_NAME,
            url: ARCFACE_MODEL_URL,
        },
        cli.arcface_model.as_deref(),
        Some(Box::new(download_progress)),
    )?;
    let person_model = model_resolver::require_file(&cli.person_model)?;
    let reid_model = model_resolver::require_file(&cli.reid_model)?;

    log::info!("Loading models");
    let store = EnrollmentStore::open(&config.recognition.db_path)?;
    log::info!("Enrollment store at {}", store.root().display());
    let resolver = IdentityResolver::new(
        store,
        Box::new(ArcFaceVerifier::new(&arcface_model)?),
        ResolverSettings::from(&config.recognition),
    );

    Ok(Models {
        person_detector: Box::new(OnnxPersonDetector::new(
            &person_model,
            config.processing.person_confidence,
        )?),
        tracker: Box::new(ByteTracker::new(&config.tracker)),
        embedder: Box::new(OnnxReidEmbedder::new(&reid_model)?),
        face_detector: Box::new(OnnxFaceDetector::new(&face_model, DEFAULT_CONFIDENCE)?),
        resolver,
    })
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(d) = cli.duration {
        if !d.is_finite() || d <= 0.0 {
            return Err(format!("Duration must be a positive number of seconds, got {d}").into());
        }
    }
    if !cli.report_every.is_finite() || cli.report_every <= 0.0 {
        return Err(format!(
            "Report interval must be a positive number of seconds, got {}",
            cli.report_every
        )
        .into());
    }
    Ok(())
}

fn report(persons: &[PersonView]) {
    if persons.is_empty() {
        log::info!("No persons tracked");
        return;
    }
    for person in persons {
        let names: Vec<&str> = person.faces.iter().map(|f| f.name.as_str()).collect();
        log::info!(
            "Person {} at ({}, {}) {}x{}: {} [faces: {}]",
            person.id,
            person.bbox.x,
            person.bbox.y,
            person.bbox.width,
            person.bbox.height,
            person.primary_face_name(),
            names.join(", ")
        );
    }
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading model... {pct}%");
    } else {
        eprint!("\rDownloading model... {downloaded} bytes");
    }
}
