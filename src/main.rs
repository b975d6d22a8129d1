use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pathwatch::camera::{encode_still, Camera, CameraError, FrameSource};
use pathwatch::config::Config;
use pathwatch::controller::{Command, Controller};
use pathwatch::inference::{Analyzer, GeminiClient};
use pathwatch::speech::SystemVoice;
use pathwatch::verdict::{classify, Status};

#[derive(Parser)]
#[command(name = "pathwatch")]
#[command(about = "Spoken obstacle alerts from a live camera feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire the configured camera, grab one frame, and report what the
    /// driver negotiated
    CheckCamera,
    /// Run one inference pass on a saved image instead of the camera
    AnalyzeImage {
        /// Path to a JPEG or PNG image
        path: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::CheckCamera) => check_camera_command(),
        Some(Commands::AnalyzeImage { path }) => analyze_image_command(&path),
        None => run_app(),
    }
}

fn run_app() -> Result<()> {
    let config = Config::load_or_create()?;
    info!(path = %Config::config_path()?.display(), "configuration loaded");

    let camera = Camera::new(&config.camera.device, config.camera.capture_config());
    let analyzer = GeminiClient::new(&config.analysis.model, &config.analysis.api_key_var)?;
    let voice = SystemVoice::new(&config.speech.language, config.speech.rate)?;

    let mut controller = Controller::new(
        camera,
        Box::new(analyzer),
        voice,
        Duration::from_millis(config.analysis.cycle_delay_ms),
        Duration::from_millis(config.analysis.alert_cooldown_ms),
    );

    let (command_tx, command_rx) = mpsc::channel();
    command_tx
        .send(Command::Start)
        .context("Failed to queue start command")?;

    // First Ctrl-C asks the loop to shut down; a second one is handled by the
    // fallback thread if teardown ever stalls
    ctrlc::set_handler(move || {
        info!("interrupt received, stopping");
        let _ = command_tx.send(Command::Shutdown);
        thread::spawn(|| {
            thread::sleep(Duration::from_secs(10));
            warn!("teardown stalled, forcing exit");
            std::process::exit(1);
        });
    })
    .context("Failed to install interrupt handler")?;

    controller.run(command_rx);

    if let Some(error) = controller.state().error() {
        eprintln!("pathwatch stopped with an error: {error}");
    }

    Ok(())
}

fn check_camera_command() -> Result<()> {
    let config = Config::load_or_create()?;
    let mut camera = Camera::new(&config.camera.device, config.camera.capture_config());

    camera.start().context("Camera acquisition failed")?;
    if let Some((width, height, fourcc)) = camera.negotiated_format() {
        println!("Device:     {}", config.camera.device);
        println!("Negotiated: {}x{} {}", width, height, fourcc);
    }

    // The first frame can lag behind acquisition; give it a few tries
    let mut attempts = 0;
    let frame = loop {
        match camera.capture() {
            Ok(frame) => break frame,
            Err(CameraError::NotReady) if attempts < 10 => {
                attempts += 1;
                thread::sleep(Duration::from_millis(200));
            }
            Err(e) => {
                camera.stop();
                return Err(e).context("Frame capture failed");
            }
        }
    };
    camera.stop();

    println!(
        "Captured:   {}x{} {} ({} bytes)",
        frame.width,
        frame.height,
        frame.mime_type,
        frame.data.len()
    );
    Ok(())
}

fn analyze_image_command(path: &str) -> Result<()> {
    let config = Config::load_or_create()?;

    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {path}"))?;
    let rgb = image::load_from_memory(&bytes)
        .with_context(|| format!("Failed to decode {path}"))?
        .to_rgb8();
    let frame = encode_still(&rgb, &config.camera.capture_config())
        .context("Failed to encode still")?;

    println!(
        "Uploading {}x{} still ({} bytes) to {}",
        frame.width,
        frame.height,
        frame.data.len(),
        config.analysis.model
    );

    let analyzer = GeminiClient::new(&config.analysis.model, &config.analysis.api_key_var)?;
    let text = analyzer
        .analyze(&frame)
        .context("Inference request failed")?;

    let status = match classify(&text) {
        Status::Safe => "safe",
        Status::Danger => "danger",
    };
    println!("Verdict: {text}");
    println!("Status:  {status}");
    Ok(())
}
