//! Transcoder command construction
//!
//! Builds the ffmpeg argument list for capturing one camera to a file.

use super::state::RecordingOptions;
use crate::capture::CameraDevice;
use std::path::{Path, PathBuf};

/// Capture backend passed to `-f`
pub const INPUT_FORMAT: &str = "dshow";

/// Builder for a single-device capture command
#[derive(Debug, Clone)]
pub struct CaptureCommandBuilder {
    device_name: String,
    output_path: PathBuf,
    framerate: Option<u32>,
    video_size: Option<String>,
    duration_secs: Option<u64>,
    video_codec: String,
    preset: String,
    pixel_format: Option<String>,
}

impl CaptureCommandBuilder {
    pub fn new(device_name: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            device_name: device_name.into(),
            output_path: output_path.into(),
            framerate: None,
            video_size: None,
            duration_secs: None,
            video_codec: "libx264".to_string(),
            preset: "ultrafast".to_string(),
            pixel_format: None,
        }
    }

    /// Builder pre-filled from a device and session options
    ///
    /// Framerate and size fall back to 30 fps at 1920x1080.
    pub fn for_session(device: &CameraDevice, options: &RecordingOptions) -> Self {
        let mut builder = Self::new(device_input_name(device), &options.output_path)
            .with_framerate(options.fps.unwrap_or(30))
            .with_video_size(
                options
                    .resolution
                    .clone()
                    .unwrap_or_else(|| "1920x1080".to_string()),
            )
            .with_pixel_format("yuv420p");
        if let Some(duration) = options.duration {
            builder = builder.with_duration(duration);
        }
        builder
    }

    /// Builder for one stream of a two-camera capture, capped at `duration_secs`
    pub fn for_stream(
        device: &CameraDevice,
        output_path: impl Into<PathBuf>,
        duration_secs: u64,
    ) -> Self {
        Self::new(device_input_name(device), output_path).with_duration(duration_secs)
    }

    pub fn with_framerate(mut self, framerate: u32) -> Self {
        self.framerate = Some(framerate);
        self
    }

    pub fn with_video_size(mut self, size: impl Into<String>) -> Self {
        self.video_size = Some(size.into());
        self
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_secs = Some(seconds);
        self
    }

    pub fn with_pixel_format(mut self, format: impl Into<String>) -> Self {
        self.pixel_format = Some(format.into());
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn build(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-f".to_string(), INPUT_FORMAT.to_string()];

        // Input options must precede -i
        if let Some(fps) = self.framerate {
            args.extend(["-framerate".to_string(), fps.to_string()]);
        }
        if let Some(size) = &self.video_size {
            args.extend(["-video_size".to_string(), size.clone()]);
        }
        args.extend(["-i".to_string(), format!("video={}", self.device_name)]);

        args.extend([
            "-c:v".to_string(),
            self.video_codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
        ]);
        if let Some(pix_fmt) = &self.pixel_format {
            args.extend(["-pix_fmt".to_string(), pix_fmt.clone()]);
        }
        if let Some(duration) = self.duration_secs {
            args.extend(["-t".to_string(), duration.to_string()]);
        }

        args.push("-y".to_string());
        args.push(self.output_path.to_string_lossy().to_string());
        args
    }
}

/// Name to pass after `video=` for a device
fn device_input_name(device: &CameraDevice) -> String {
    device.path.clone().unwrap_or_else(|| device.name.clone())
}
