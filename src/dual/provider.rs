//! Dual-capture providers
//!
//! The coordinator's cascade only talks to a [`DualCaptureProvider`]; which
//! one it gets depends on whether the native helper is on disk.

use super::native::{NativeHelper, NativeHelperError};
use super::types::{NativeCaptureSummary, ProbeResult};
use crate::capture::DeviceSource;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Source of probe answers and native two-source capture
#[async_trait]
pub trait DualCaptureProvider: Send + Sync {
    /// Report whether two sources can be captured at once
    async fn probe(&self) -> ProbeResult;

    /// Capture both sources into `out_dir`
    async fn capture(
        &self,
        out_dir: &Path,
        duration_secs: u64,
    ) -> Result<NativeCaptureSummary, NativeHelperError>;
}

/// Provider backed by the native helper process
pub struct NativeHelperProvider {
    helper: NativeHelper,
    group: Option<String>,
}

impl NativeHelperProvider {
    pub fn new(helper: NativeHelper, group: Option<String>) -> Self {
        Self { helper, group }
    }
}

#[async_trait]
impl DualCaptureProvider for NativeHelperProvider {
    async fn probe(&self) -> ProbeResult {
        // No heuristic fallback here: a broken helper is reported as such
        match self.helper.probe(self.group.as_deref()).await {
            Ok((report, probe_output)) => ProbeResult::Native {
                report,
                probe_output,
            },
            Err(e) => {
                tracing::warn!("Native probe via {:?} failed: {}", self.helper.path(), e);
                ProbeResult::Failed {
                    native_probe_used: true,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn capture(
        &self,
        out_dir: &Path,
        duration_secs: u64,
    ) -> Result<NativeCaptureSummary, NativeHelperError> {
        self.helper.capture(out_dir, duration_secs).await
    }
}

/// Provider that infers capability from the number of listed cameras
pub struct HeuristicProvider {
    devices: Arc<dyn DeviceSource>,
}

impl HeuristicProvider {
    pub fn new(devices: Arc<dyn DeviceSource>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl DualCaptureProvider for HeuristicProvider {
    async fn probe(&self) -> ProbeResult {
        ProbeResult::from_devices(self.devices.detect_cameras().await)
    }

    async fn capture(
        &self,
        _out_dir: &Path,
        _duration_secs: u64,
    ) -> Result<NativeCaptureSummary, NativeHelperError> {
        Err(NativeHelperError::Unsupported)
    }
}
