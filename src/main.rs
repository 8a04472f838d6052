use anyhow::Context;
use clap::{Parser, Subcommand};
use dualcam::capture::{DeviceSource, FfmpegDeviceEnumerator};
use dualcam::dual::{DualCaptureCoordinator, DualCaptureOptions};
use dualcam::recorder::{RecordingSession, MAX_DURATION_SECS};
use dualcam::tuning::{CameraParameter, CameraParameterController};
use dualcam::{AppConfig, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dualcam")]
#[command(about = "Headless camera capture with dual-source fallback")]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record and upload on a fixed interval until Ctrl-C (default)
    Run,

    /// Run a single orchestration iteration
    Once,

    /// List available cameras as JSON
    Devices,

    /// Report whether two sources can be captured at once
    Probe,

    /// Capture two sources, falling back to one camera
    DualCapture {
        /// Directory receiving the capture
        #[arg(short, long)]
        out_dir: PathBuf,

        /// Capture duration in seconds
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..=MAX_DURATION_SECS))]
        duration: Option<u64>,
    },

    /// Set a hardware parameter through the camera helper
    Tune {
        #[arg(value_enum)]
        parameter: TuneParameter,

        /// Camera id as listed by `dualcam devices`
        #[arg(long)]
        device: String,

        #[arg(long, allow_hyphen_values = true)]
        value: i64,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum TuneParameter {
    Exposure,
    Iso,
    WhiteBalance,
}

impl From<TuneParameter> for CameraParameter {
    fn from(parameter: TuneParameter) -> Self {
        match parameter {
            TuneParameter::Exposure => CameraParameter::Exposure,
            TuneParameter::Iso => CameraParameter::Iso,
            TuneParameter::WhiteBalance => CameraParameter::WhiteBalance,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dualcam::init_tracing();

    let cli = Cli::parse();
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(code = e.code(), "{}", e);
            return Err(e).context("invalid configuration");
        }
    };
    if config.test_mode {
        tracing::info!("Test mode: no external processes will be started");
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let orchestrator = Orchestrator::from_config(config);
            orchestrator
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                })
                .await;
        }
        Commands::Once => {
            let orchestrator = Orchestrator::from_config(config);
            let outcome = orchestrator.run_iteration().await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Devices => {
            let enumerator = FfmpegDeviceEnumerator::new(&config.ffmpeg_path, config.test_mode);
            let devices = enumerator.detect_cameras().await;
            println!("{}", serde_json::to_string_pretty(&devices)?);
        }
        Commands::Probe => {
            let probe = coordinator(&config).probe().await;
            println!("{}", serde_json::to_string_pretty(&probe)?);
        }
        Commands::DualCapture { out_dir, duration } => {
            let mut options = DualCaptureOptions::new(out_dir);
            options.duration_seconds = duration;
            let outcome = coordinator(&config).start_dual_capture(&options).await;
            tracing::info!("Dual capture finished with tier '{}'", outcome.tier());
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Tune {
            parameter,
            device,
            value,
        } => {
            let controller = CameraParameterController::from_config(&config);
            let outcome = controller.apply(parameter.into(), &device, value).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}

fn coordinator(config: &AppConfig) -> DualCaptureCoordinator {
    let devices = Arc::new(FfmpegDeviceEnumerator::new(
        &config.ffmpeg_path,
        config.test_mode,
    ));
    let session = Arc::new(RecordingSession::new(&config.ffmpeg_path, config.test_mode));
    DualCaptureCoordinator::new(config, devices, session)
}
