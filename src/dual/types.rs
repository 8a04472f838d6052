//! Dual-capture types
//!
//! Probe results and capture outcomes are closed sets of tagged variants,
//! each carrying only the fields that apply to it.

use crate::capture::CameraDevice;
use crate::recorder::MAX_DURATION_SECS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Capture length used when the caller gives none
pub const DEFAULT_CAPTURE_SECS: u64 = 5;

/// Options for one dual-capture attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualCaptureOptions {
    /// Created if absent; tiers add their own sub-directories
    pub out_dir: PathBuf,
    pub duration_seconds: Option<u64>,
}

impl DualCaptureOptions {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            duration_seconds: None,
        }
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    /// Requested length, clamped to what a recording session accepts
    pub fn duration(&self) -> u64 {
        self.duration_seconds
            .unwrap_or(DEFAULT_CAPTURE_SECS)
            .clamp(1, MAX_DURATION_SECS)
    }
}

/// Response of the native helper's `probe` directive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeProbeReport {
    #[serde(default)]
    pub can_dual_capture: bool,
    #[serde(default)]
    pub groups: Vec<serde_json::Value>,
    #[serde(default)]
    pub details: Option<String>,
}

/// Response of the native helper's `capture` directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeCaptureSummary {
    pub success: bool,
    #[serde(default)]
    pub color_frames_saved: u64,
    #[serde(default)]
    pub infra_frames_saved: u64,
    #[serde(default)]
    pub out_dir: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

/// Result of asking whether two sources can be captured at once
///
/// Produced fresh on every probe, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProbeResult {
    /// The native helper answered
    #[serde(rename_all = "camelCase")]
    Native {
        report: NativeProbeReport,
        /// Raw JSON as printed by the helper
        probe_output: serde_json::Value,
    },

    /// Device count from the transcoder listing
    #[serde(rename_all = "camelCase")]
    Heuristic {
        devices: Vec<CameraDevice>,
        details: String,
    },

    /// The probe could not be completed
    #[serde(rename_all = "camelCase")]
    Failed {
        native_probe_used: bool,
        error: String,
    },
}

impl ProbeResult {
    /// Build a heuristic result from an enumeration
    pub fn from_devices(devices: Vec<CameraDevice>) -> Self {
        let details = format!("Detected {} device(s) via transcoder listing", devices.len());
        Self::Heuristic { devices, details }
    }

    pub fn success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn native_probe_used(&self) -> bool {
        match self {
            Self::Native { .. } => true,
            Self::Heuristic { .. } => false,
            Self::Failed {
                native_probe_used, ..
            } => *native_probe_used,
        }
    }

    /// `None` when the probe failed
    pub fn can_dual_capture(&self) -> Option<bool> {
        match self {
            Self::Native { report, .. } => Some(report.can_dual_capture),
            Self::Heuristic { devices, .. } => Some(devices.len() >= 2),
            Self::Failed { .. } => None,
        }
    }

    /// Opaque probe payload: the helper's JSON or the enumerated devices
    pub fn probe_output(&self) -> Option<serde_json::Value> {
        match self {
            Self::Native { probe_output, .. } => Some(probe_output.clone()),
            Self::Heuristic { devices, .. } => serde_json::to_value(devices).ok(),
            Self::Failed { .. } => None,
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Native { report, .. } => report.details.as_deref(),
            Self::Heuristic { details, .. } => Some(details),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Devices the probe discovered, when it enumerated any
    pub fn devices(&self) -> Option<&[CameraDevice]> {
        match self {
            Self::Heuristic { devices, .. } => Some(devices),
            _ => None,
        }
    }
}

/// One transcoder stream of a two-camera capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamResult {
    pub device: String,
    pub output: PathBuf,
    /// `None` when terminated by a signal
    pub exit_code: Option<i32>,
}

impl StreamResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Which tier of the cascade produced output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "camelCase")]
pub enum CaptureOutcome {
    /// The native helper captured both sources
    Native(NativeCaptureSummary),

    /// Two transcoder processes ran side by side
    DualProcess {
        color: StreamResult,
        infra: StreamResult,
    },

    /// One camera was recorded
    Single { output: PathBuf },

    /// No tier produced a file
    Nothing,
}

impl CaptureOutcome {
    pub fn tier(&self) -> &'static str {
        match self {
            Self::Native(_) => "native",
            Self::DualProcess { .. } => "dual-process",
            Self::Single { .. } => "single",
            Self::Nothing => "nothing",
        }
    }
}
