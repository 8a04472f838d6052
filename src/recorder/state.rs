//! Recording state management
//!
//! Defines the recording state machine, the per-session options and the
//! errors surfaced by a session.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// State of the recording slot
///
/// `Idle → Starting → Recording → {Stopped, Failed}`. Only `Starting` and
/// `Recording` hold the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording has run yet
    Idle,
    /// Process spawned, waiting for confirmation
    Starting,
    /// Confirmed underway
    Recording,
    /// Ended cleanly or on request
    Stopped,
    /// Ended with an error
    Failed,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}

impl RecordingState {
    /// Whether this state holds the single active-session slot
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Recording)
    }
}

/// Options for one recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOptions {
    /// Destination file, must be writable
    pub output_path: PathBuf,

    /// Length cap in seconds; `None` records until stopped
    pub duration: Option<u64>,

    /// Capture framerate
    pub fps: Option<u32>,

    /// Capture size as `WxH`
    pub resolution: Option<String>,
}

impl RecordingOptions {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            duration: None,
            fps: None,
            resolution: None,
        }
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    /// Check the fields the transcoder would otherwise reject late
    pub fn validate(&self) -> RecordingResult<()> {
        if self.output_path.as_os_str().is_empty() {
            return Err(RecordingError::InvalidOptions("output path is empty".to_string()));
        }
        if self.fps == Some(0) {
            return Err(RecordingError::InvalidOptions("fps must be positive".to_string()));
        }
        if let Some(seconds) = self.duration {
            if !(1..=MAX_DURATION_SECS).contains(&seconds) {
                return Err(RecordingError::InvalidOptions(format!(
                    "duration must be between 1 and {}s, got {}s",
                    MAX_DURATION_SECS, seconds
                )));
            }
        }
        if let Some(resolution) = &self.resolution {
            if parse_resolution(resolution).is_none() {
                return Err(RecordingError::InvalidOptions(format!(
                    "resolution '{}' is not WxH",
                    resolution
                )));
            }
        }
        Ok(())
    }
}

/// Longest recording a single session accepts
pub const MAX_DURATION_SECS: u64 = 24 * 60 * 60;

/// Parse a `WxH` string into positive dimensions
pub fn parse_resolution(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.trim().split_once(['x', 'X'])?;
    let width = w.parse::<u32>().ok().filter(|v| *v > 0)?;
    let height = h.parse::<u32>().ok().filter(|v| *v > 0)?;
    Some((width, height))
}

/// How a session ended, kept after the process is reaped
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub output_path: PathBuf,
    /// Terminal state (`Stopped` or `Failed`)
    pub state: RecordingState,
    /// Process exit code; `None` when killed by a signal or simulated
    pub exit_code: Option<i32>,
    /// Whether `stop()` ended the session
    pub stop_requested: bool,
    /// Last diagnostic lines from the transcoder
    pub stderr_tail: Vec<String>,
}

/// Recording errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("No camera selected")]
    NoDeviceSelected,

    #[error("Recording already in progress")]
    AlreadyRecording,

    #[error("No active recording")]
    NoActiveSession,

    #[error("Invalid recording options: {0}")]
    InvalidOptions(String),

    #[error("Recording failed with exit code {code:?}: {context}")]
    StartFailed { code: Option<i32>, context: String },

    #[error("Recording failed after start with exit code {code:?}: {context}")]
    Aborted { code: Option<i32>, context: String },

    #[error("Failed to start transcoder: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RecordingResult<T> = Result<T, RecordingError>;
