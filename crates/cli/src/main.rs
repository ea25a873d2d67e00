use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use facecascade_core::annotation::infrastructure::box_annotator::BoxAnnotator;
use facecascade_core::capture::domain::frame_source::FrameSource;
use facecascade_core::capture::infrastructure::ffmpeg_capture::FfmpegCaptureSource;
use facecascade_core::capture::infrastructure::image_decoder::read_image;
use facecascade_core::capture::infrastructure::image_file_writer::ImageFileWriter;
use facecascade_core::detection::domain::classifier_loader::ClassifierLoader;
use facecascade_core::detection::domain::ensemble::CascadeEnsemble;
use facecascade_core::detection::infrastructure::create_loader;
use facecascade_core::detection::infrastructure::model_resolver::ModelStore;
use facecascade_core::pipeline::detection_session::{DetectionSession, EndReason, SessionEvent};
use facecascade_core::pipeline::frame_pipeline::FramePipeline;
use facecascade_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use facecascade_core::shared::constants::{DEFAULT_CAMERA_DEVICE, IMAGE_EXTENSIONS};
use facecascade_core::shared::settings::{ClassifierBackend, DetectionSettings};

/// Face detection with an ensemble of cascade classifiers.
#[derive(Parser)]
#[command(name = "facecascade")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Classifier backend: seeta or haar. Defaults to haar in builds with
    /// OpenCV, since only it fills every ensemble slot.
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Directory searched for model files before downloading.
    #[arg(long, global = true)]
    models: Option<PathBuf>,

    /// Never download models; fail if they are not cached or bundled.
    #[arg(long, global = true)]
    offline: bool,

    /// Settings file (JSON). Defaults to the user config file if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run the accurate pass every Nth stream frame.
    #[arg(long, global = true)]
    cadence: Option<u64>,

    /// IoU above which overlapping boxes are merged (0.0-1.0).
    #[arg(long, global = true)]
    overlap: Option<f64>,
}

#[derive(Subcommand)]
enum Command {
    /// Detect faces in one image and write an annotated copy.
    Image {
        /// Input image file.
        input: PathBuf,
        /// Output image file.
        output: PathBuf,
    },
    /// Detect faces on a live camera and keep refreshing a snapshot file.
    Stream {
        /// Snapshot image file, overwritten with the latest annotated frame.
        output: PathBuf,

        /// Camera device path, index or stream URL.
        #[arg(long, default_value = DEFAULT_CAMERA_DEVICE)]
        device: String,

        /// Stop after this many seconds (default: until Ctrl-C).
        #[arg(long)]
        duration: Option<u64>,

        /// Snapshot refresh interval in milliseconds.
        #[arg(long, default_value = "500")]
        snapshot_ms: u64,
    },
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
    let settings = load_settings(&cli)?;
    let loader = build_loader(&cli, &settings)?;

    match cli.command {
        Command::Image { input, output } => run_image(&input, &output, loader.as_ref(), &settings),
        Command::Stream {
            output,
            device,
            duration,
            snapshot_ms,
        } => run_stream(
            &output,
            &device,
            duration.map(Duration::from_secs),
            Duration::from_millis(snapshot_ms.max(1)),
            loader.as_ref(),
            &settings,
        ),
    }
}

fn run_image(
    input: &Path,
    output: &Path,
    loader: &dyn ClassifierLoader,
    settings: &DetectionSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    if !input.exists() {
        return Err(format!("Input file not found: {}", input.display()).into());
    }
    if !is_image(output) {
        return Err(format!("Output must be an image file, got {}", output.display()).into());
    }

    let frame = read_image(input)?;
    let ensemble = CascadeEnsemble::load(loader)?;
    let mut pipeline = FramePipeline::new(ensemble, Box::new(BoxAnnotator::new()), settings)?;

    let outcome = pipeline.detect_image(&frame)?;
    ImageFileWriter::new().write(output, &outcome.frame)?;

    println!("{} face(s)", outcome.faces.len());
    log::info!("Output written to {}", output.display());
    Ok(())
}

fn run_stream(
    output: &Path,
    device: &str,
    duration: Option<Duration>,
    snapshot_every: Duration,
    loader: &dyn ClassifierLoader,
    settings: &DetectionSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    if !is_image(output) {
        return Err(format!("Output must be an image file, got {}", output.display()).into());
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    let session = DetectionSession::open(
        loader,
        || FfmpegCaptureSource::open(device).map(|s| Box::new(s) as Box<dyn FrameSource>),
        Box::new(BoxAnnotator::new()),
        settings,
        Box::new(StdoutPipelineLogger::default()),
    )?;

    let writer = ImageFileWriter::new();
    let deadline = duration.map(|d| Instant::now() + d);
    let mut last_written = None;

    loop {
        std::thread::sleep(snapshot_every);

        for event in session.events().try_iter() {
            match event {
                SessionEvent::FrameSkipped { index, reason } => {
                    log::warn!("Frame {index} skipped: {reason}")
                }
                SessionEvent::Ended(EndReason::CaptureFailed(reason)) => {
                    log::warn!("Camera stopped delivering frames: {reason}")
                }
                _ => {}
            }
        }

        if let Some(latest) = session.latest() {
            if last_written != Some(latest.index) {
                writer.write(output, &latest.frame)?;
                log::info!("Frame {}: {} face(s)", latest.index, latest.faces.len());
                last_written = Some(latest.index);
            }
        }

        if interrupted.load(Ordering::SeqCst) {
            log::info!("Interrupted");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) || !session.is_running() {
            break;
        }
    }

    session.stop()?;
    log::info!("Latest snapshot at {}", output.display());
    Ok(())
}

fn load_settings(cli: &Cli) -> Result<DetectionSettings, Box<dyn std::error::Error>> {
    let mut settings = match &cli.config {
        Some(path) => DetectionSettings::load_from(path)?,
        None => DetectionSettings::load()?,
    };
    if let Some(backend) = &cli.backend {
        settings.backend = parse_backend(backend)?;
    }
    if let Some(cadence) = cli.cadence {
        settings.cadence_interval = cadence;
    }
    if let Some(overlap) = cli.overlap {
        settings.overlap_threshold = overlap;
    }
    settings.validate()?;
    Ok(settings)
}

fn build_loader(
    cli: &Cli,
    settings: &DetectionSettings,
) -> Result<Box<dyn ClassifierLoader>, Box<dyn std::error::Error>> {
    let mut store = ModelStore::new()
        .offline(cli.offline)
        .with_progress(Arc::new(download_progress));
    if let Some(dir) = &cli.models {
        store = store.with_bundled_dir(dir);
    }
    log::info!("Using {} classifier backend", settings.backend);
    Ok(create_loader(settings.backend, store)?)
}

fn parse_backend(name: &str) -> Result<ClassifierBackend, String> {
    ClassifierBackend::ALL
        .iter()
        .copied()
        .find(|b| b.to_string() == name.to_lowercase())
        .ok_or_else(|| format!("Backend must be 'seeta' or 'haar', got '{name}'"))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn download_progress(name: &str, downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading {name}... {pct}%");
        if downloaded >= total {
            eprintln!();
        }
    } else {
        eprint!("\rDownloading {name}... {downloaded} bytes");
    }
}
