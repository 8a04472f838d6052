//! Capture trait definitions
//!
//! Platform-agnostic types for capture sources.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Information about a camera device
///
/// Identity is the name reported by the device listing; no numeric handle is
/// assumed to be stable across processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDevice {
    /// Device ID (the listed name)
    pub id: String,

    /// Display name
    pub name: String,

    /// Input path or selector, when distinct from the name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl CameraDevice {
    /// A device whose id, name and path are all the listed name
    pub fn from_listed_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name: name.clone(),
            path: Some(name),
        }
    }

    /// Whether the device name contains `marker`, ignoring case
    pub fn matches_model(&self, marker: &str) -> bool {
        !marker.is_empty() && self.name.to_lowercase().contains(&marker.to_lowercase())
    }
}

/// Something that can report the currently attached cameras
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// List cameras in the order the backend reports them.
    ///
    /// Never fails: backend errors degrade to an empty list.
    async fn detect_cameras(&self) -> Vec<CameraDevice>;
}
