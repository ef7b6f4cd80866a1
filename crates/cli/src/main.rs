mod app_config;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;

use facewatch_core::capture::infrastructure::default_source_provider::DefaultSourceProvider;
use facewatch_core::detection::infrastructure::onnx_face_detector::{
    OnnxFaceDetector, DEFAULT_CONFIDENCE,
};
use facewatch_core::recognition::domain::face_recognizer::FaceRecognizer;
use facewatch_core::recognition::infrastructure::embedding_face_recognizer::{
    EmbeddingFaceRecognizer, DEFAULT_THRESHOLD,
};
use facewatch_core::recognition::infrastructure::http_face_recognizer::HttpFaceRecognizer;
use facewatch_core::recognition::infrastructure::null_face_recognizer::NullFaceRecognizer;
use facewatch_core::session::activity_log::{DetectionEvent, SessionStats};
use facewatch_core::session::session_manager::SessionManager;
use facewatch_core::session::stream_session::StreamSnapshot;
use facewatch_core::shared::clock::MonotonicClock;
use facewatch_core::shared::constants::{
    EMBEDDING_MODEL_NAME, EMBEDDING_MODEL_URL, FACE_MODEL_NAME, FACE_MODEL_URL,
};
use facewatch_core::shared::model_resolver::{self, ModelSpec};

use app_config::AppConfig;

/// Live face tracking and recognition across multiple video streams.
#[derive(Parser)]
#[command(name = "facewatch")]
struct Cli {
    /// JSON config file with streams and tuning blocks.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stream source as `id=selector` or `selector` (repeatable).
    /// Selectors: default, synthetic, dir:<path>, a device path or a URL.
    #[arg(long = "source")]
    sources: Vec<String>,

    /// Face detection model (downloaded and cached when omitted).
    #[arg(long)]
    detector_model: Option<PathBuf>,

    /// Directory of `<personId>_<name>.jpg` reference photos for local recognition.
    #[arg(long, conflicts_with = "recognizer_url")]
    gallery: Option<PathBuf>,

    /// Remote recognition endpoint that accepts JPEG face crops.
    #[arg(long)]
    recognizer_url: Option<String>,

    /// Bearer token for --recognizer-url.
    #[arg(long, requires = "recognizer_url")]
    api_key: Option<String>,

    /// Minimum cosine similarity for a gallery match (0.0-1.0).
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    match_threshold: f64,

    /// Override the minimum detection confidence for every stream (0.0-1.0).
    #[arg(long)]
    min_confidence: Option<f64>,

    /// Stop after this many seconds (runs until interrupted when omitted).
    #[arg(long)]
    duration: Option<u64>,

    /// Seconds between status reports.
    #[arg(long, default_value = "5")]
    report_interval: u64,

    /// Print status reports as JSON lines.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    streams: Vec<StreamSnapshot>,
    stats: SessionStats,
    recent_events: Vec<DetectionEvent>,
}

const RECENT_EVENTS_IN_REPORT: usize = 5;
/// Kept under the default recognition timeout.
const RECOGNIZER_TIMEOUT: Duration = Duration::from_millis(2000);

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

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    for source in &cli.sources {
        config.add_source_arg(source)?;
    }
    if let Some(min_confidence) = cli.min_confidence {
        config.tracking.min_confidence = min_confidence;
        for stream in &mut config.streams {
            if let Some(tracking) = stream.tracking.as_mut() {
                tracking.min_confidence = min_confidence;
            }
        }
    }
    let streams = config.resolve_streams()?;

    let detector_model = match &cli.detector_model {
        Some(path) => path.clone(),
        None => resolve_model(FACE_MODEL_NAME, FACE_MODEL_URL)?,
    };
    let recognizer = build_recognizer(&cli)?;

    let mut manager = SessionManager::new(
        &config.manager,
        Arc::new(DefaultSourceProvider::new()),
        recognizer,
        Arc::new(MonotonicClock::new()),
    )?;
    for stream in streams {
        let model_path = detector_model.clone();
        let detector =
            OnnxFaceDetector::spawn_loading(move || Ok(model_path), DEFAULT_CONFIDENCE);
        manager.add_stream(stream.id, stream.selector, Box::new(detector), stream.tracking)?;
    }

    let mut started = 0;
    for (id, result) in manager.start_all() {
        match result {
            Ok(kind) => {
                log::info!("Stream {id} running ({kind:?} source)");
                started += 1;
            }
            Err(e) => log::error!("{e}"),
        }
    }
    if started == 0 {
        return Err("No stream could be started".into());
    }

    monitor(&manager, &cli)?;
    manager.stop_all();

    let stats = manager.stats();
    log::info!(
        "Done: {} detections, {} recognized, {} errors",
        stats.total_detections,
        stats.recognized_count,
        stats.error_count
    );
    Ok(())
}

/// Prints a status report every `report_interval` seconds until the
/// optional duration elapses.
fn monitor(manager: &SessionManager, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let deadline = cli.duration.map(|secs| start + Duration::from_secs(secs));
    let interval = Duration::from_secs(cli.report_interval.max(1));
    let mut next_report = start + interval;

    loop {
        let now = Instant::now();
        let wake = deadline.map_or(next_report, |d| d.min(next_report));
        thread::sleep(wake.saturating_duration_since(now));

        let report = StatusReport {
            streams: manager.snapshots(),
            stats: manager.stats(),
            recent_events: manager.recent_events(RECENT_EVENTS_IN_REPORT),
        };
        if cli.json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            print!("{}", format_report(&report));
        }
        next_report += interval;

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(());
        }
    }
}

fn format_report(report: &StatusReport) -> String {
    let mut out = String::new();
    for stream in &report.streams {
        let source = if stream.uses_fallback_source {
            "synthetic"
        } else {
            stream.selected_device.as_deref().unwrap_or("-")
        };
        let quality = stream
            .quality
            .as_ref()
            .map(|q| format!("{:?} {:.2}", q.category, q.score).to_lowercase())
            .unwrap_or_else(|| "n/a".to_string());
        out.push_str(&format!(
            "[{}] {:?} on {source}, {} tracks, quality {quality}\n",
            stream.stream_id,
            stream.state,
            stream.tracks.len()
        ));
        for track in &stream.tracks {
            out.push_str(&format!(
                "    {} {} ({:.2})\n",
                track.id,
                track.display_name(),
                track.confidence
            ));
        }
    }
    out.push_str(&format!(
        "detections {}, recognized {}, errors {}\n",
        report.stats.total_detections, report.stats.recognized_count, report.stats.error_count
    ));
    out
}

fn build_recognizer(cli: &Cli) -> Result<Arc<dyn FaceRecognizer>, Box<dyn std::error::Error>> {
    if let Some(gallery) = &cli.gallery {
        let model_path = resolve_model(EMBEDDING_MODEL_NAME, EMBEDDING_MODEL_URL)?;
        let mut recognizer = EmbeddingFaceRecognizer::new(&model_path, cli.match_threshold)
            .map_err(|e| e as Box<dyn std::error::Error>)?;
        let enrolled = recognizer
            .enroll_directory(gallery)
            .map_err(|e| e as Box<dyn std::error::Error>)?;
        if enrolled == 0 {
            log::warn!("Gallery {} has no usable faces", gallery.display());
        }
        return Ok(Arc::new(recognizer));
    }
    if let Some(url) = &cli.recognizer_url {
        let mut recognizer = HttpFaceRecognizer::new(url.as_str(), RECOGNIZER_TIMEOUT)?;
        if let Some(key) = &cli.api_key {
            recognizer = recognizer.with_api_key(key.as_str());
        }
        return Ok(Arc::new(recognizer));
    }
    log::warn!("No recognizer configured; every face will be reported as unknown");
    Ok(Arc::new(NullFaceRecognizer))
}

fn resolve_model(name: &str, url: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {name}");
    let path = model_resolver::resolve(
        ModelSpec { name, url },
        None,
        Some(Box::new(download_progress)),
    )?;
    eprintln!();
    Ok(path)
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(config) = &cli.config {
        require_exists(config, "Config file")?;
    }
    if let Some(model) = &cli.detector_model {
        require_exists(model, "Detector model")?;
    }
    if let Some(gallery) = &cli.gallery {
        if !gallery.is_dir() {
            return Err(format!("Gallery directory not found: {}", gallery.display()).into());
        }
    }
    if !(0.0..=1.0).contains(&cli.match_threshold) {
        return Err(format!(
            "Match threshold must be between 0.0 and 1.0, got {}",
            cli.match_threshold
        )
        .into());
    }
    if let Some(c) = cli.min_confidence {
        if !(0.0..=1.0).contains(&c) {
            return Err(format!("Confidence must be between 0.0 and 1.0, got {c}").into());
        }
    }
    if cli.report_interval == 0 {
        return Err("Report interval must be at least 1 second".into());
    }
    Ok(())
}

fn require_exists(path: &Path, what: &str) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        Ok(())
    } else {
        Err(format!("{what} not found: {}", path.display()).into())
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
