//! FFmpeg-based device enumeration
//!
//! Runs the transcoder in device-listing mode and scrapes its diagnostic
//! output for video devices.

use super::traits::{CameraDevice, DeviceSource};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Marker the transcoder prints after every video device
const VIDEO_MARKER: &str = "(video)";

/// Device returned in test mode
pub const MOCK_CAMERA_ID: &str = "mock-camera";

/// Lists cameras through `ffmpeg -f dshow -list_devices true`
#[derive(Debug, Clone)]
pub struct FfmpegDeviceEnumerator {
    ffmpeg_path: PathBuf,
    test_mode: bool,
}

impl FfmpegDeviceEnumerator {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, test_mode: bool) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            test_mode,
        }
    }

    /// Arguments for the device-listing invocation
    pub fn listing_args() -> [&'static str; 7] {
        [
            "-hide_banner",
            "-f",
            "dshow",
            "-list_devices",
            "true",
            "-i",
            "dummy",
        ]
    }

    fn mock_camera() -> CameraDevice {
        CameraDevice {
            id: MOCK_CAMERA_ID.to_string(),
            name: "Mock Camera".to_string(),
            path: Some(MOCK_CAMERA_ID.to_string()),
        }
    }
}

#[async_trait]
impl DeviceSource for FfmpegDeviceEnumerator {
    async fn detect_cameras(&self) -> Vec<CameraDevice> {
        if self.test_mode {
            return vec![Self::mock_camera()];
        }

        // The listing always "fails" (there is no input named dummy), so the
        // exit status is ignored and only stderr matters.
        let output = match Command::new(&self.ffmpeg_path)
            .args(Self::listing_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Failed to run device listing via {:?}: {}", self.ffmpeg_path, e);
                return Vec::new();
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!("Device listing output:\n{}", stderr);

        let cameras = parse_device_list(&stderr);
        for camera in &cameras {
            tracing::debug!("Found camera: {}", camera.name);
        }
        tracing::info!("Total cameras detected: {}", cameras.len());
        cameras
    }
}

/// Extract video devices from device-listing output
///
/// Any line containing `(video)` and a double-quoted substring yields one
/// device named after the first quoted substring, in line order.
pub fn parse_device_list(output: &str) -> Vec<CameraDevice> {
    output
        .lines()
        .filter(|line| line.contains(VIDEO_MARKER))
        .filter_map(first_quoted)
        .map(CameraDevice::from_listed_name)
        .collect()
}

fn first_quoted(line: &str) -> Option<&str> {
    let start = line.find('"')? + 1;
    let len = line[start..].find('"')?;
    let name = &line[start..start + len];
    (!name.is_empty()).then_some(name)
}
