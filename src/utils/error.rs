//! Error types and handling
//!
//! Application-wide error type wrapping the per-module errors.

use crate::dual::native::NativeHelperError;
use crate::recorder::RecordingError;
use crate::upload::UploadError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Native helper error: {0}")]
    NativeHelper(#[from] NativeHelperError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Config error: {0}")]
    Config(String),
}

impl AppError {
    /// Short machine-readable code, used in structured log fields
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Recording(_) => "RECORDING_ERROR",
            AppError::NativeHelper(_) => "NATIVE_HELPER_ERROR",
            AppError::Upload(_) => "UPLOAD_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = AppError::from(RecordingError::AlreadyRecording);
        assert_eq!(err.code(), "RECORDING_ERROR");
        assert!(err.to_string().contains("already"));

        let err = AppError::Config("bad interval".to_string());
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
