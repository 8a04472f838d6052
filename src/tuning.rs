//! Camera parameter tuning
//!
//! Exposure, ISO and white balance are set through an external helper using
//! the same JSON-on-stdout convention as the dual-capture helper. Tuning is
//! best effort: every failure is logged and reported as skipped.

use crate::config::AppConfig;
use crate::dual::native::{NativeHelper, NativeHelperError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Hardware parameter the helper can set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraParameter {
    Exposure,
    Iso,
    WhiteBalance,
}

impl CameraParameter {
    /// Helper directive for this parameter
    pub fn directive(&self) -> &'static str {
        match self {
            Self::Exposure => "set-exposure",
            Self::Iso => "set-iso",
            Self::WhiteBalance => "set-white-balance",
        }
    }
}

/// Result of a tuning request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum TuningOutcome {
    Applied { details: Option<String> },
    Skipped { reason: String },
}

impl TuningOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

#[derive(Error, Debug)]
enum TuningError {
    #[error("camera '{0}' is not a supported model")]
    UnsupportedModel(String),

    #[error("helper not found at {0:?}")]
    HelperMissing(PathBuf),

    #[error(transparent)]
    Helper(#[from] NativeHelperError),

    #[error("helper reported failure: {0}")]
    Rejected(String),
}

#[derive(Debug, Deserialize)]
struct HelperStatus {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Sets hardware parameters on cameras of the preferred model
#[derive(Debug, Clone)]
pub struct CameraParameterController {
    helper_path: PathBuf,
    preferred_model: String,
}

impl CameraParameterController {
    pub fn new(helper_path: impl Into<PathBuf>, preferred_model: impl Into<String>) -> Self {
        Self {
            helper_path: helper_path.into(),
            preferred_model: preferred_model.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.camera_helper_path, &config.preferred_model)
    }

    pub async fn set_exposure(&self, camera_id: &str, value: i64) -> TuningOutcome {
        self.apply(CameraParameter::Exposure, camera_id, value).await
    }

    pub async fn set_iso(&self, camera_id: &str, value: i64) -> TuningOutcome {
        self.apply(CameraParameter::Iso, camera_id, value).await
    }

    pub async fn set_white_balance(&self, camera_id: &str, value: i64) -> TuningOutcome {
        self.apply(CameraParameter::WhiteBalance, camera_id, value).await
    }

    pub async fn apply(
        &self,
        parameter: CameraParameter,
        camera_id: &str,
        value: i64,
    ) -> TuningOutcome {
        match self.invoke(parameter, camera_id, value).await {
            Ok(details) => {
                tracing::info!("{} = {} applied to '{}'", parameter.directive(), value, camera_id);
                TuningOutcome::Applied { details }
            }
            Err(e) => {
                tracing::warn!("Skipping {} for '{}': {}", parameter.directive(), camera_id, e);
                TuningOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn invoke(
        &self,
        parameter: CameraParameter,
        camera_id: &str,
        value: i64,
    ) -> Result<Option<String>, TuningError> {
        let marker = self.preferred_model.to_lowercase();
        if marker.is_empty() || !camera_id.to_lowercase().contains(&marker) {
            return Err(TuningError::UnsupportedModel(camera_id.to_string()));
        }
        if !self.helper_path.is_file() {
            return Err(TuningError::HelperMissing(self.helper_path.clone()));
        }

        let args = [
            parameter.directive().to_string(),
            "--device".to_string(),
            camera_id.to_string(),
            "--value".to_string(),
            value.to_string(),
        ];
        let stdout = NativeHelper::at(&self.helper_path).run(&args).await?;
        if stdout.is_empty() {
            return Ok(None);
        }

        match serde_json::from_str::<HelperStatus>(&stdout) {
            Ok(status) if status.success => Ok(status.details),
            Ok(status) => Err(TuningError::Rejected(
                status
                    .error
                    .or(status.details)
                    .unwrap_or_else(|| "no details".to_string()),
            )),
            // Exit 0 without JSON counts as applied
            Err(_) => {
                tracing::debug!("Helper printed non-JSON output: {}", stdout);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_other_models_are_skipped() {
        let controller = CameraParameterController::new("/nonexistent/camera-control", "brio");
        let outcome = controller.set_exposure("OBS Virtual Camera", -5).await;
        assert!(matches!(outcome, TuningOutcome::Skipped { ref reason } if reason.contains("not a supported model")));
    }

    #[tokio::test]
    async fn test_missing_helper_is_skipped() {
        let dir = tempdir().unwrap();
        let controller = CameraParameterController::new(dir.path().join("camera-control"), "brio");
        assert!(!controller.set_iso("Logitech BRIO", 400).await.is_applied());
    }

    #[test]
    fn test_directives() {
        assert_eq!(CameraParameter::Exposure.directive(), "set-exposure");
        assert_eq!(CameraParameter::Iso.directive(), "set-iso");
        assert_eq!(CameraParameter::WhiteBalance.directive(), "set-white-balance");
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::test_support::write_script;

        #[tokio::test]
        async fn test_helper_success() {
            let dir = tempdir().unwrap();
            let helper = write_script(
                dir.path(),
                "camera-control",
                "echo \"{\\\"success\\\": true, \\\"details\\\": \\\"$1 $3 $5\\\"}\"\n",
            );
            let controller = CameraParameterController::new(helper, "brio");

            let outcome = controller.set_white_balance("Logitech BRIO", 4500).await;
            assert_eq!(
                outcome,
                TuningOutcome::Applied {
                    details: Some("set-white-balance Logitech BRIO 4500".to_string())
                }
            );
        }

        #[tokio::test]
        async fn test_plain_exit_zero_counts_as_applied() {
            let dir = tempdir().unwrap();
            let helper = write_script(dir.path(), "camera-control", "echo done\n");
            let controller = CameraParameterController::new(helper, "brio");
            assert!(controller.set_exposure("Logitech BRIO", -5).await.is_applied());
        }

        #[tokio::test]
        async fn test_reported_failure_is_skipped() {
            let dir = tempdir().unwrap();
            let helper = write_script(
                dir.path(),
                "camera-control",
                "echo '{\"success\": false, \"error\": \"property not supported\"}'\n",
            );
            let controller = CameraParameterController::new(helper, "brio");

            match controller.set_iso("Logitech BRIO", 800).await {
                TuningOutcome::Skipped { reason } => assert!(reason.contains("property not supported")),
                other => panic!("unexpected outcome: {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_non_zero_exit_is_skipped() {
            let dir = tempdir().unwrap();
            let helper = write_script(dir.path(), "camera-control", "exit 1\n");
            let controller = CameraParameterController::new(helper, "brio");
            assert!(!controller.set_exposure("Logitech BRIO", 1).await.is_applied());
        }
    }
}
