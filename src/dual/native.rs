//! Native helper invocation
//!
//! The helper is an out-of-process binary speaking JSON on stdout. It is run
//! either directly or, for a framework-dependent build, through `dotnet`.

use super::types::{NativeCaptureSummary, NativeProbeReport};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Base name of the dual-capture helper
pub const HELPER_NAME: &str = "MediaProbe";

/// Native helper errors
#[derive(Error, Debug)]
pub enum NativeHelperError {
    #[error("Native helper not found in {0:?}")]
    NotFound(PathBuf),

    #[error("Native capture is not available from this provider")]
    Unsupported,

    #[error("Failed to run native helper: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Native helper exited with code {code:?}: {output}")]
    Exit { code: Option<i32>, output: String },

    #[error("Invalid native helper output: {0}")]
    InvalidOutput(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Invocation {
    Executable(PathBuf),
    Dotnet(PathBuf),
}

/// A helper binary found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeHelper {
    invocation: Invocation,
}

impl NativeHelper {
    /// Find the helper in `dir`: the Windows executable, then a unix build,
    /// then the managed assembly run through `dotnet`.
    pub fn locate(dir: &Path) -> Option<Self> {
        let exe = dir.join(format!("{}.exe", HELPER_NAME));
        if exe.is_file() {
            return Some(Self::at(exe));
        }
        let bin = dir.join(HELPER_NAME);
        if bin.is_file() {
            return Some(Self::at(bin));
        }
        let dll = dir.join(format!("{}.dll", HELPER_NAME));
        if dll.is_file() {
            return Some(Self::at(dll));
        }
        None
    }

    /// Helper at an explicit path, run through `dotnet` if it is an assembly
    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let is_assembly = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("dll"))
            .unwrap_or(false);
        let invocation = if is_assembly {
            Invocation::Dotnet(path)
        } else {
            Invocation::Executable(path)
        };
        Self { invocation }
    }

    pub fn path(&self) -> &Path {
        match &self.invocation {
            Invocation::Executable(path) | Invocation::Dotnet(path) => path,
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = match &self.invocation {
            Invocation::Executable(path) => Command::new(path),
            Invocation::Dotnet(dll) => {
                let mut cmd = Command::new("dotnet");
                cmd.arg(dll);
                cmd
            }
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run one directive and return its trimmed stdout
    pub async fn run(&self, args: &[String]) -> Result<String, NativeHelperError> {
        tracing::debug!("Running native helper {:?} {}", self.path(), args.join(" "));

        let output = self
            .command(args)
            .output()
            .await
            .map_err(NativeHelperError::Spawn)?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(NativeHelperError::Exit {
                code: output.status.code(),
                output: if stderr.is_empty() { stdout } else { stderr },
            });
        }
        Ok(stdout)
    }

    /// `probe [--group=<filter>]`
    pub async fn probe(
        &self,
        group: Option<&str>,
    ) -> Result<(NativeProbeReport, serde_json::Value), NativeHelperError> {
        let mut args = vec!["probe".to_string()];
        if let Some(group) = group {
            args.push(format!("--group={}", group));
        }

        let raw = self.run(&args).await?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        let report = serde_json::from_value(value.clone())?;
        Ok((report, value))
    }

    /// `capture --outDir=<dir> --duration=<secs>`
    pub async fn capture(
        &self,
        out_dir: &Path,
        duration_secs: u64,
    ) -> Result<NativeCaptureSummary, NativeHelperError> {
        let args = vec![
            "capture".to_string(),
            format!("--outDir={}", out_dir.display()),
            format!("--duration={}", duration_secs),
        ];
        let raw = self.run(&args).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_locate_order() {
        let dir = tempdir().unwrap();
        assert!(NativeHelper::locate(dir.path()).is_none());

        std::fs::write(dir.path().join("MediaProbe.dll"), b"").unwrap();
        let helper = NativeHelper::locate(dir.path()).unwrap();
        assert!(matches!(helper.invocation, Invocation::Dotnet(_)));

        std::fs::write(dir.path().join("MediaProbe"), b"").unwrap();
        let helper = NativeHelper::locate(dir.path()).unwrap();
        assert_eq!(helper.path(), dir.path().join("MediaProbe"));

        std::fs::write(dir.path().join("MediaProbe.exe"), b"").unwrap();
        let helper = NativeHelper::locate(dir.path()).unwrap();
        assert_eq!(helper.path(), dir.path().join("MediaProbe.exe"));
    }

    #[test]
    fn test_directories_are_not_helpers() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("MediaProbe")).unwrap();
        assert!(NativeHelper::locate(dir.path()).is_none());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let helper = NativeHelper::at("/nonexistent/MediaProbe");
        let err = helper.probe(None).await.unwrap_err();
        assert!(matches!(err, NativeHelperError::Spawn(_)));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::test_support::write_script;

        #[tokio::test]
        async fn test_probe_passes_group_and_parses_json() {
            let dir = tempdir().unwrap();
            write_script(
                dir.path(),
                "MediaProbe",
                "echo \"{\\\"canDualCapture\\\": true, \\\"groups\\\": [], \\\"details\\\": \\\"$2\\\"}\"\n",
            );
            let helper = NativeHelper::locate(dir.path()).unwrap();

            let (report, raw) = helper.probe(Some("RealSense")).await.unwrap();
            assert!(report.can_dual_capture);
            assert_eq!(report.details.as_deref(), Some("--group=RealSense"));
            assert_eq!(raw["canDualCapture"], serde_json::Value::Bool(true));
        }

        #[tokio::test]
        async fn test_capture_failure_exit_code() {
            let dir = tempdir().unwrap();
            write_script(
                dir.path(),
                "MediaProbe",
                "echo '{\"success\": false, \"details\": \"no infrared source\"}'\nexit 2\n",
            );
            let helper = NativeHelper::locate(dir.path()).unwrap();

            match helper.capture(dir.path(), 3).await {
                Err(NativeHelperError::Exit { code, output }) => {
                    assert_eq!(code, Some(2));
                    assert!(output.contains("no infrared source"));
                }
                other => panic!("unexpected result: {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_non_json_output() {
            let dir = tempdir().unwrap();
            write_script(dir.path(), "MediaProbe", "echo 'probing...'\n");
            let helper = NativeHelper::locate(dir.path()).unwrap();

            let err = helper.probe(None).await.unwrap_err();
            assert!(matches!(err, NativeHelperError::InvalidOutput(_)));
        }
    }
}
