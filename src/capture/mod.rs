//! Camera discovery
//!
//! This module finds locally attached cameras by asking the transcoder to
//! list its capture devices.

pub mod devices;
pub mod traits;

pub use devices::{parse_device_list, FfmpegDeviceEnumerator};
pub use traits::{CameraDevice, DeviceSource};
