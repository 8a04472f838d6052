//! Orchestration loop
//!
//! Each iteration resolves the upload destination, enumerates cameras,
//! picks one, records a short clip and hands it to the upload gateway. An
//! iteration never fails the loop; it only reports what it produced.

use crate::capture::{CameraDevice, DeviceSource, FfmpegDeviceEnumerator};
use crate::config::AppConfig;
use crate::recorder::{
    RecordingError, RecordingOptions, RecordingSession, RecordingState, COMPLETION_SLACK,
};
use crate::upload::{DryRunGateway, S3CliGateway, UploadGateway};
use crate::utils::paths::{storage_key, timestamped_path};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// Step an iteration was in when it gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationStage {
    Init,
    Record,
}

/// What one iteration produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum IterationOutcome {
    /// Recorded and handed off
    Uploaded { path: PathBuf, key: String },
    /// Recorded, but the hand-off failed
    #[serde(rename_all = "camelCase")]
    UploadFailed {
        path: PathBuf,
        key: String,
        error: String,
    },
    /// Enumeration found no camera
    NoDevices,
    Failed { stage: IterationStage, error: String },
}

impl IterationOutcome {
    /// Recording produced by the iteration, uploaded or not
    pub fn recording(&self) -> Option<&PathBuf> {
        match self {
            Self::Uploaded { path, .. } | Self::UploadFailed { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Everything one iteration decided before recording
#[derive(Debug, Clone)]
pub struct IterationPlan {
    pub device: CameraDevice,
    pub options: RecordingOptions,
}

/// Top-level control loop
pub struct Orchestrator {
    config: AppConfig,
    devices: Arc<dyn DeviceSource>,
    session: Arc<RecordingSession>,
    gateway: Arc<dyn UploadGateway>,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        devices: Arc<dyn DeviceSource>,
        session: Arc<RecordingSession>,
        gateway: Arc<dyn UploadGateway>,
    ) -> Self {
        Self {
            config,
            devices,
            session,
            gateway,
        }
    }

    /// Wire the production collaborators; test mode uploads nothing
    pub fn from_config(config: AppConfig) -> Self {
        let devices: Arc<dyn DeviceSource> = Arc::new(FfmpegDeviceEnumerator::new(
            &config.ffmpeg_path,
            config.test_mode,
        ));
        let session = Arc::new(RecordingSession::new(&config.ffmpeg_path, config.test_mode));
        let gateway: Arc<dyn UploadGateway> = if config.test_mode {
            Arc::new(DryRunGateway)
        } else {
            Arc::new(S3CliGateway::new(config.upload.clone()))
        };
        Self::new(config, devices, session, gateway)
    }

    pub fn session(&self) -> &Arc<RecordingSession> {
        &self.session
    }

    /// Preferred model if present, otherwise the first camera
    pub fn select_device<'a>(devices: &'a [CameraDevice], marker: &str) -> Option<&'a CameraDevice> {
        devices
            .iter()
            .find(|d| d.matches_model(marker))
            .or_else(|| devices.first())
    }

    /// Decide device and options for one iteration
    pub fn plan(&self, devices: &[CameraDevice]) -> Option<IterationPlan> {
        let device = Self::select_device(devices, &self.config.preferred_model)?.clone();
        let defaults = &self.config.recording;
        let options = RecordingOptions::new(timestamped_path(
            &self.config.recordings_dir,
            "test",
            "mp4",
        ))
        .with_duration(defaults.duration_secs)
        .with_fps(defaults.fps)
        .with_resolution(defaults.resolution.clone());

        Some(IterationPlan { device, options })
    }

    /// Run one iteration inside its own span
    pub async fn run_iteration(&self) -> IterationOutcome {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("iteration", id = %id);
        self.iteration().instrument(span).await
    }

    async fn iteration(&self) -> IterationOutcome {
        if let Err(e) = self.gateway.prepare().await {
            tracing::error!("Upload gateway not ready: {}", e);
            return IterationOutcome::Failed {
                stage: IterationStage::Init,
                error: e.to_string(),
            };
        }

        let devices = self.devices.detect_cameras().await;
        let Some(plan) = self.plan(&devices) else {
            tracing::warn!("No cameras found, skipping this iteration");
            return IterationOutcome::NoDevices;
        };
        tracing::info!(
            "Selected camera '{}' of {} detected",
            plan.device.name,
            devices.len()
        );

        if let Err(e) = self.record(&plan).await {
            tracing::error!("Recording failed: {}", e);
            return IterationOutcome::Failed {
                stage: IterationStage::Record,
                error: e.to_string(),
            };
        }

        let path = plan.options.output_path;
        let key = storage_key(&path, &self.config.recordings_dir);
        match self.gateway.upload(&path, &key).await {
            Ok(()) => IterationOutcome::Uploaded { path, key },
            Err(e) => {
                tracing::error!("Upload of {:?} failed: {}", path, e);
                IterationOutcome::UploadFailed {
                    path,
                    key,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Record the planned clip and wait until the file is final
    async fn record(&self, plan: &IterationPlan) -> Result<(), RecordingError> {
        self.session.start(Some(&plan.device), &plan.options).await?;

        let limit = Duration::from_secs(plan.options.duration.unwrap_or_default())
            .saturating_add(COMPLETION_SLACK);
        match self.session.wait_for_completion(limit).await {
            Some(RecordingState::Stopped) => Ok(()),
            Some(_) => {
                let outcome = self.session.last_outcome();
                Err(RecordingError::Aborted {
                    code: outcome.as_ref().and_then(|o| o.exit_code),
                    context: outcome
                        .and_then(|o| o.stderr_tail.last().cloned())
                        .unwrap_or_default(),
                })
            }
            None => {
                tracing::warn!("Recording still running after {:?}, stopping it", limit);
                self.session.stop().await
            }
        }
    }

    /// Loop forever
    pub async fn run(&self) {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Loop until `shutdown` resolves, then stop any active recording
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(
            "Orchestrator running, iterating every {:?}",
            self.config.loop_interval()
        );

        loop {
            tokio::select! {
                outcome = self.run_iteration() => {
                    tracing::info!("Iteration finished: {:?}", outcome);
                }
                _ = &mut shutdown => break,
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.loop_interval()) => {}
                _ = &mut shutdown => break,
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&self) {
        tracing::info!("Shutting down orchestrator");
        if self.session.is_recording() {
            if let Err(e) = self.session.stop().await {
                tracing::warn!("Failed to stop active recording: {}", e);
            }
        }
    }
}
