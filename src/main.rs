use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use tracing::info;

use consult_recorder::{
    backend::HttpBackend,
    capture::CaptureSource,
    config::Config,
    consultation::{AuthContext, ConsultationForm, ConsultationRecord, Role},
    delivery::DownloadDirectory,
    encoder::ffmpeg_available,
    init_tracing,
    utils::{AppError, ErrorResponse},
    RecordingManager,
};

/// Record a consultation from the webcam and microphone
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Capture source, `native` or `synthetic`; overrides capture.source
    #[arg(long)]
    source: Option<CaptureSource>,
    /// Webcam index; overrides capture.camera_index
    #[arg(long)]
    camera: Option<u32>,
    #[arg(long)]
    patient_name: String,
    #[arg(long)]
    uhid_id: String,
    #[arg(long)]
    attender_name: String,
    #[arg(long)]
    icu_consultant_name: String,
    #[arg(long)]
    doctor_name: String,
    /// Id of the signed-in doctor
    #[arg(long)]
    user_id: String,
    /// Bearer token for the backend
    #[arg(long, env = "CONSULT_API_TOKEN", hide_env_values = true)]
    token: String,
    /// How long to record for
    #[arg(short, long, default_value_t = 5)]
    seconds: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return report(err.into()),
    };
    init_tracing(&config.log.level);

    match run(args, config).await {
        Ok(record) => match serde_json::to_string_pretty(&record) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(err) => report(err.into()),
        },
        Err(err) => match err.downcast::<AppError>() {
            Ok(err) => report(err),
            Err(err) => {
                eprintln!("{err:#}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(args: Args, mut config: Config) -> anyhow::Result<ConsultationRecord> {
    if let Some(source) = args.source {
        config.capture.source = source;
    }
    if let Some(camera) = args.camera {
        config.capture.camera_index = camera;
    }
    config.validate()?;

    match config.capture.source {
        CaptureSource::Native if !ffmpeg_available(&config.encoder.ffmpeg_path) => {
            anyhow::bail!(
                "FFmpeg not found at {:?}. Please install FFmpeg or set encoder.ffmpeg_path",
                config.encoder.ffmpeg_path
            );
        }
        CaptureSource::Native => {}
        CaptureSource::Synthetic => {
            tracing::warn!("Recording the synthetic test pattern; no camera is used")
        }
    }
    let device = config.capture.device().map_err(|e| AppError::Recording(e.into()))?;

    let backend = HttpBackend::new(&config.backend, config.encoder.container)
        .map_err(AppError::from)?;
    info!("Using backend {}", backend.base_url());

    let auth = AuthContext {
        user_id: args.user_id,
        token: args.token,
        role: Role::Doctor,
    };
    let mut manager = RecordingManager::from_config(
        &config,
        device,
        Arc::new(backend),
        Arc::new(DownloadDirectory::new(&config.delivery.download_dir)),
        auth,
    );

    let form = ConsultationForm {
        patient_name: args.patient_name,
        uhid_id: args.uhid_id,
        attender_name: args.attender_name,
        icu_consultant_name: args.icu_consultant_name,
        doctor_name: args.doctor_name,
    };
    let session_id = manager.start(form).await.map_err(AppError::from)?;
    info!(
        "Recording {} ({}) for {}s",
        session_id,
        config.encoder.container.mime_type(),
        args.seconds
    );

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.seconds)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping early"),
    }

    let record = manager
        .stop()
        .await
        .map_err(AppError::from)?
        .context("recording was not in progress")?;

    if let Some(ledger) = manager.upload_ledger() {
        let counts = ledger.counts();
        info!(
            "Uploads: {} sent, {} failed, {} pending",
            counts.sent, counts.failed, counts.pending
        );
    }
    Ok(record)
}

fn report(err: AppError) -> ExitCode {
    let response = ErrorResponse::from(err);
    match serde_json::to_string(&response) {
        Ok(json) => eprintln!("{json}"),
        Err(_) => eprintln!("{}: {}", response.code, response.message),
    }
    ExitCode::FAILURE
}
