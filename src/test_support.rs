//! Fakes shared by unit tests

use crate::capture::{CameraDevice, DeviceSource};
use crate::upload::{UploadError, UploadGateway};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Write an executable shell script standing in for an external binary
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(format!("#!/bin/sh\n{}", body).as_bytes())
        .unwrap();
    file.sync_all().unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Device source returning a fixed list
pub struct StaticDevices(pub Vec<CameraDevice>);

impl StaticDevices {
    pub fn named(names: &[&str]) -> Self {
        Self(names.iter().map(|n| CameraDevice::from_listed_name(*n)).collect())
    }
}

#[async_trait]
impl DeviceSource for StaticDevices {
    async fn detect_cameras(&self) -> Vec<CameraDevice> {
        self.0.clone()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum GatewayMode {
    Accept,
    FailUploads,
    Unconfigured,
}

/// Gateway remembering what it was asked to upload
pub struct RecordingGateway {
    mode: GatewayMode,
    uploads: Mutex<Vec<(PathBuf, String)>>,
}

impl RecordingGateway {
    fn with_mode(mode: GatewayMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            uploads: Mutex::new(Vec::new()),
        })
    }

    pub fn new() -> Arc<Self> {
        Self::with_mode(GatewayMode::Accept)
    }

    pub fn failing() -> Arc<Self> {
        Self::with_mode(GatewayMode::FailUploads)
    }

    pub fn unconfigured() -> Arc<Self> {
        Self::with_mode(GatewayMode::Unconfigured)
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl UploadGateway for RecordingGateway {
    async fn prepare(&self) -> Result<(), UploadError> {
        if self.mode == GatewayMode::Unconfigured {
            return Err(UploadError::NotConfigured(PathBuf::from("aws.json")));
        }
        Ok(())
    }

    async fn upload(&self, path: &Path, key: &str) -> Result<(), UploadError> {
        if self.mode == GatewayMode::FailUploads {
            return Err(UploadError::Failed {
                status: Some(1),
                stderr: "simulated outage".to_string(),
            });
        }
        self.uploads.lock().push((path.to_path_buf(), key.to_string()));
        Ok(())
    }
}
