//! Upload hand-off
//!
//! Finished recordings are handed to an [`UploadGateway`] with a storage key.
//! The S3 gateway shells out to the AWS CLI; the destination bucket is
//! resolved on first use and cached for the gateway's lifetime.

use crate::config::UploadConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::OnceCell;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No upload bucket configured: {0:?} is missing and DUALCAM_BUCKET is unset")]
    NotConfigured(PathBuf),

    #[error("Recording not found: {0:?}")]
    MissingFile(PathBuf),

    #[error("Failed to run upload command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Upload failed with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },

    #[error("Invalid upload configuration: {0}")]
    Config(String),
}

/// Receiver of completed recordings
#[async_trait]
pub trait UploadGateway: Send + Sync {
    /// Resolve the destination; called before every iteration
    async fn prepare(&self) -> Result<(), UploadError>;

    /// Upload `path` under `key`
    async fn upload(&self, path: &Path, key: &str) -> Result<(), UploadError>;
}

/// Resolved upload destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
}

impl UploadTarget {
    pub fn object_url(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

/// Contents of the provisioning output file
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketFile {
    bucket_name: String,
}

/// Gateway uploading through `aws s3 cp`
pub struct S3CliGateway {
    config: UploadConfig,
    program: PathBuf,
    target: OnceCell<UploadTarget>,
}

impl S3CliGateway {
    pub fn new(config: UploadConfig) -> Self {
        Self {
            config,
            program: PathBuf::from("aws"),
            target: OnceCell::new(),
        }
    }

    /// Use a different CLI binary
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Destination, resolved once; a failed resolution is retried next call
    pub async fn target(&self) -> Result<&UploadTarget, UploadError> {
        self.target
            .get_or_try_init(|| resolve_target(&self.config))
            .await
    }

    fn command_args(target: &UploadTarget, path: &Path, key: &str) -> Vec<String> {
        let mut args = vec![
            "s3".to_string(),
            "cp".to_string(),
            path.to_string_lossy().to_string(),
            target.object_url(key),
        ];
        if let Some(endpoint) = &target.endpoint_url {
            args.extend(["--endpoint-url".to_string(), endpoint.clone()]);
        }
        args.extend(["--region".to_string(), target.region.clone()]);
        args
    }
}

#[async_trait]
impl UploadGateway for S3CliGateway {
    async fn prepare(&self) -> Result<(), UploadError> {
        self.target().await.map(|_| ())
    }

    async fn upload(&self, path: &Path, key: &str) -> Result<(), UploadError> {
        if !path.is_file() {
            return Err(UploadError::MissingFile(path.to_path_buf()));
        }
        let target = self.target().await?;
        let args = Self::command_args(target, path, key);
        tracing::info!("Uploading {:?} to {}", path, target.object_url(key));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(UploadError::Spawn)?;

        if !output.status.success() {
            return Err(UploadError::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        tracing::info!("Uploaded {}", key);
        Ok(())
    }
}

async fn resolve_target(config: &UploadConfig) -> Result<UploadTarget, UploadError> {
    let bucket = match tokio::fs::read_to_string(&config.config_file).await {
        Ok(raw) => {
            let file: BucketFile = serde_json::from_str(&raw).map_err(|e| {
                UploadError::Config(format!("{:?}: {}", config.config_file, e))
            })?;
            file.bucket_name
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => config
            .bucket
            .clone()
            .ok_or_else(|| UploadError::NotConfigured(config.config_file.clone()))?,
        Err(e) => {
            return Err(UploadError::Config(format!(
                "failed to read {:?}: {}",
                config.config_file, e
            )))
        }
    };

    if bucket.trim().is_empty() {
        return Err(UploadError::Config("bucket name is empty".to_string()));
    }

    tracing::info!("Upload destination: s3://{} ({})", bucket, config.region);
    Ok(UploadTarget {
        bucket,
        region: config.region.clone(),
        endpoint_url: config.endpoint_url.clone(),
    })
}

/// Gateway that only logs; used in test mode
#[derive(Debug, Default)]
pub struct DryRunGateway;

#[async_trait]
impl UploadGateway for DryRunGateway {
    async fn prepare(&self) -> Result<(), UploadError> {
        Ok(())
    }

    async fn upload(&self, path: &Path, key: &str) -> Result<(), UploadError> {
        if !path.is_file() {
            return Err(UploadError::MissingFile(path.to_path_buf()));
        }
        tracing::info!("Dry run: would upload {:?} as {}", path, key);
        Ok(())
    }
}
