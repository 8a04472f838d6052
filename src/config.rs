//! Runtime configuration
//!
//! All knobs are resolved once at startup from the environment, falling back
//! to the documented factory values in [`Default`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::recorder::MAX_DURATION_SECS;
use crate::utils::error::{AppError, AppResult};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Replace every external process with deterministic synthetic behavior
    pub test_mode: bool,

    /// Transcoder binary used for listing devices and recording
    pub ffmpeg_path: PathBuf,

    /// Directory receiving time-stamped recordings
    pub recordings_dir: PathBuf,

    /// Directory searched for the native dual-capture helper
    pub native_helper_dir: PathBuf,

    /// Optional `--group=` filter passed to the native probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_group: Option<String>,

    /// Camera parameter helper executable
    pub camera_helper_path: PathBuf,

    /// Case-insensitive marker of the preferred camera model
    pub preferred_model: String,

    /// Pause between orchestration iterations
    pub loop_interval_secs: u64,

    /// Per-iteration recording policy
    pub recording: RecordingDefaults,

    /// Upload destination
    pub upload: UploadConfig,
}

/// Recording policy used by the orchestrator and the single-camera fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingDefaults {
    pub duration_secs: u64,
    pub fps: u32,
    pub resolution: String,
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            duration_secs: 5,
            fps: 30,
            resolution: "1920x1080".to_string(),
        }
    }
}

/// Where finished recordings are handed off to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    /// JSON file holding `{"bucketName": ...}` written by provisioning
    pub config_file: PathBuf,

    /// Bucket override used when the config file is absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    pub region: String,

    /// S3-compatible endpoint (empty for AWS S3)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("./config/aws.json"),
            bucket: None,
            region: "us-east-2".to_string(),
            endpoint_url: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            test_mode: false,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            recordings_dir: PathBuf::from("./recordings"),
            native_helper_dir: PathBuf::from("./native/media_probe/publish"),
            probe_group: None,
            camera_helper_path: PathBuf::from("./apps/camera-control.exe"),
            preferred_model: "brio".to_string(),
            loop_interval_secs: 60,
            recording: RecordingDefaults::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl AppConfig {
    /// Build the configuration from process environment variables
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.test_mode = ["TEST_MODE", "DUALCAM_TEST_MODE"]
            .iter()
            .filter_map(|key| lookup(key))
            .any(|v| is_truthy(&v));

        if let Some(v) = lookup("DUALCAM_FFMPEG") {
            config.ffmpeg_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DUALCAM_RECORDINGS_DIR") {
            config.recordings_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DUALCAM_NATIVE_HELPER_DIR") {
            config.native_helper_dir = PathBuf::from(v);
        }
        config.probe_group = lookup("DUALCAM_PROBE_GROUP").filter(|v| !v.is_empty());
        if let Some(v) = lookup("CAMERA_HELPER_PATH") {
            config.camera_helper_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DUALCAM_PREFERRED_MODEL") {
            config.preferred_model = v;
        }
        if let Some(v) = lookup("DUALCAM_INTERVAL_SECS") {
            config.loop_interval_secs = parse_number("DUALCAM_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("DUALCAM_DURATION_SECS") {
            config.recording.duration_secs = parse_number("DUALCAM_DURATION_SECS", &v)?;
        }
        if let Some(v) = lookup("DUALCAM_FPS") {
            config.recording.fps = parse_number("DUALCAM_FPS", &v)?;
        }
        if let Some(v) = lookup("DUALCAM_RESOLUTION") {
            config.recording.resolution = v;
        }

        if let Some(v) = lookup("DUALCAM_UPLOAD_CONFIG") {
            config.upload.config_file = PathBuf::from(v);
        }
        config.upload.bucket = lookup("DUALCAM_BUCKET").filter(|v| !v.is_empty());
        if let Some(v) = lookup("AWS_REGION") {
            config.upload.region = v;
        }
        config.upload.endpoint_url = lookup("DUALCAM_S3_ENDPOINT").filter(|v| !v.is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> AppResult<()> {
        if self.loop_interval_secs == 0 {
            return Err(AppError::Config("loop interval must be at least 1s".to_string()));
        }
        if self.recording.fps == 0 {
            return Err(AppError::Config("fps must be positive".to_string()));
        }
        if !(1..=MAX_DURATION_SECS).contains(&self.recording.duration_secs) {
            return Err(AppError::Config(format!(
                "recording duration must be between 1 and {}s, got {}s",
                MAX_DURATION_SECS, self.recording.duration_secs
            )));
        }
        if crate::recorder::parse_resolution(&self.recording.resolution).is_none() {
            return Err(AppError::Config(format!(
                "invalid resolution '{}', expected WxH",
                self.recording.resolution
            )));
        }
        Ok(())
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_secs)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> AppResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{} must be a number, got '{}'", key, value)))
}
