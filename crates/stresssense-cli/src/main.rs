use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use stresssense_core::report::{self, ReportError};
use stresssense_core::{CsvEmotionLog, EmotionLogger, FaceDetector, OnnxEmotionClassifier, Source};
use stresssense_hw::Camera;
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;

/// Image types accepted by `analyze`.
const UPLOAD_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Parser)]
#[command(name = "stresssense", version, about = "StressSense emotion detection CLI")]
struct Cli {
    /// TOML config file (also read from STRESSSENSE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emotion log CSV, overriding the config
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the emotion log (header only) if it does not exist
    Init,
    /// Detect the emotion in an image file and log it
    Analyze {
        /// Image to analyze (jpg, jpeg or png)
        image: PathBuf,
    },
    /// Detect emotions on the live webcam feed and log each frame
    Webcam {
        /// Stop after this many frames (default: run until Ctrl-C)
        #[arg(short, long)]
        frames: Option<usize>,
        /// V4L2 device, overriding the config
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Show the most recent emotion log rows
    Report {
        /// Number of rows to show
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the full emotion log, unmodified
    Export {
        /// Destination file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = cli.log_file {
        config.log_file = path;
    }

    match cli.command {
        Commands::Init => {
            CsvEmotionLog::open(&config.log_file)
                .with_context(|| format!("creating {}", config.log_file.display()))?;
            println!("Emotion log: {}", config.log_file.display());
        }
        Commands::Analyze { image } => analyze(&config, &image).await?,
        Commands::Webcam { frames, device } => {
            if let Some(device) = device {
                config.camera_device = device;
            }
            webcam(&config, frames).await?;
        }
        Commands::Report { limit, json } => {
            print_report(&config.log_file, limit.unwrap_or(config.report_rows), json)?
        }
        Commands::Export { output } => export(&config.log_file, output.as_deref())?,
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

/// Load the classifier (plus detector when available) and open the log.
fn build_logger(config: &Config) -> Result<EmotionLogger<OnnxEmotionClassifier, CsvEmotionLog>> {
    let mut classifier = OnnxEmotionClassifier::load(&config.emotion_model_path())
        .context("loading emotion model")?;

    if config.detector_enabled {
        match FaceDetector::load(&config.detector_model_path()) {
            Ok(detector) => classifier = classifier.with_detector(detector),
            Err(e) => tracing::warn!(error = %e, "face detector unavailable"),
        }
    }
    if classifier.has_detector() {
        tracing::info!("face detector loaded; classifying face crops");
    } else {
        tracing::info!("no face detector; classifying full frames");
    }

    let log = CsvEmotionLog::open(&config.log_file)
        .with_context(|| format!("opening {}", config.log_file.display()))?;

    Ok(EmotionLogger::new(classifier, log))
}

fn check_upload_extension(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !UPLOAD_EXTENSIONS.contains(&ext.as_str()) {
        bail!(
            "unsupported image type {:?}; expected one of {}",
            path.display().to_string(),
            UPLOAD_EXTENSIONS.join(", ")
        );
    }
    Ok(())
}

/// Upload path: failures are reported to the user and nothing is logged.
async fn analyze(config: &Config, path: &Path) -> Result<()> {
    check_upload_extension(path)?;
    let logger = build_logger(config)?;

    let image = image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .to_rgb8();
    tracing::debug!(width = image.width(), height = image.height(), "image decoded");

    let handle = engine::spawn_engine(logger, None, 0)?;
    let emotion = handle
        .analyze(image, Source::ImageUpload)
        .await
        .context("emotion detection failed")?;

    println!("Detected Emotion: {}", emotion.as_str().to_uppercase());
    Ok(())
}

/// Webcam path: per-frame failures are swallowed so the stream keeps going.
///
/// Ctrl-C closes the event channel; the engine notices and ends the session,
/// so the summary is printed either way.
async fn webcam(config: &Config, frames: Option<usize>) -> Result<()> {
    let logger = build_logger(config)?;
    let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)
        .with_context(|| format!("opening camera {}", config.camera_device))?;
    let handle = engine::spawn_engine(logger, Some(camera), config.warmup_frames)?;

    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => print_live_event(event),
                    None => break,
                },
                _ = &mut stop_rx => break,
            }
        }
    });

    let watch = handle.watch(frames, events_tx);
    tokio::pin!(watch);

    let summary = tokio::select! {
        summary = &mut watch => summary?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted; stopping webcam");
            let _ = stop_tx.send(());
            watch.await?
        }
    };
    let _ = printer.await;

    println!(
        "{} frames: {} logged, {} unannotated",
        summary.frames, summary.classified, summary.unannotated
    );
    Ok(())
}

fn print_live_event(event: engine::LiveEvent) {
    let engine::LiveEvent {
        sequence,
        emotion,
        dark,
    } = event;
    let light = if dark { " (low light)" } else { "" };
    match emotion {
        Some(emotion) => println!("[{sequence}] Emotion: {emotion}{light}"),
        None => println!("[{sequence}] -{light}"),
    }
}

fn print_report(log_file: &Path, limit: usize, json: bool) -> Result<()> {
    let report = match report::load_report(log_file, limit) {
        Ok(report) => report,
        Err(ReportError::NotFound(_)) => {
            println!("No emotion data logged yet.");
            return Ok(());
        }
        Err(e) => return Err(e).context("reading emotion log"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.recent.is_empty() {
        println!("No emotion data logged yet.");
        return Ok(());
    }

    println!(
        "Emotion Detection Report (last {} of {} rows)",
        report.recent.len(),
        report.total_rows
    );
    println!("{:<19}  {:<12}  emotion", "timestamp", "source");
    for record in &report.recent {
        println!(
            "{:<19}  {:<12}  {}",
            record.timestamp.format(stresssense_core::types::TIMESTAMP_FORMAT).to_string(),
            record.source.as_str(),
            record.emotion
        );
    }
    Ok(())
}

fn export(log_file: &Path, output: Option<&Path>) -> Result<()> {
    let bytes = match output {
        Some(path) => {
            let mut file = std::fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            let n = report::export(log_file, &mut file)?;
            tracing::info!(path = %path.display(), bytes = n, "exported emotion log");
            n
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            let n = report::export(log_file, &mut lock)?;
            lock.flush()?;
            n
        }
    };
    tracing::debug!(bytes, "export complete");
    Ok(())
}
