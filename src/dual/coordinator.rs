//! Dual-capture coordinator
//!
//! Runs the capture cascade: native helper, then two transcoder processes
//! side by side, then a single-camera recording. The first tier that
//! produces output wins; nothing is retried and no error reaches the caller.

use super::native::NativeHelper;
use super::provider::{DualCaptureProvider, HeuristicProvider, NativeHelperProvider};
use super::types::{CaptureOutcome, DualCaptureOptions, ProbeResult, StreamResult};
use crate::capture::{CameraDevice, DeviceSource};
use crate::config::{AppConfig, RecordingDefaults};
use crate::recorder::ffmpeg::CaptureCommandBuilder;
use crate::recorder::monitor::{drain_diagnostics, LineBuffer, StartSignal, TAIL_CAPACITY};
use crate::recorder::{RecordingOptions, RecordingSession, RecordingState, COMPLETION_SLACK};
use crate::utils::paths::timestamped_path;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};

/// A spawned stream of the dual-process tier
struct StreamProcess {
    child: Child,
    device: String,
    output: PathBuf,
    label: String,
}

/// Chooses and runs a capture tier
pub struct DualCaptureCoordinator {
    ffmpeg_path: PathBuf,
    helper_dir: PathBuf,
    probe_group: Option<String>,
    test_mode: bool,
    defaults: RecordingDefaults,
    devices: Arc<dyn DeviceSource>,
    session: Arc<RecordingSession>,
    /// Fixed provider; resolved from disk on every probe when unset
    provider: Option<Arc<dyn DualCaptureProvider>>,
    /// Held across each native-helper invocation
    native_guard: tokio::sync::Mutex<()>,
}

impl DualCaptureCoordinator {
    pub fn new(
        config: &AppConfig,
        devices: Arc<dyn DeviceSource>,
        session: Arc<RecordingSession>,
    ) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            helper_dir: config.native_helper_dir.clone(),
            probe_group: config.probe_group.clone(),
            test_mode: config.test_mode,
            defaults: config.recording.clone(),
            devices,
            session,
            provider: None,
            native_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn DualCaptureProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Provider for this attempt: the native helper if it is on disk
    fn resolve_provider(&self) -> Arc<dyn DualCaptureProvider> {
        if let Some(provider) = &self.provider {
            return provider.clone();
        }
        if !self.test_mode {
            if let Some(helper) = NativeHelper::locate(&self.helper_dir) {
                tracing::debug!("Using native helper at {:?}", helper.path());
                return Arc::new(NativeHelperProvider::new(helper, self.probe_group.clone()));
            }
        }
        Arc::new(HeuristicProvider::new(self.devices.clone()))
    }

    /// Ask whether two sources can be captured at once
    pub async fn probe(&self) -> ProbeResult {
        let _native = self.native_guard.lock().await;
        self.resolve_provider().probe().await
    }

    /// Capture with the first tier that works
    pub async fn start_dual_capture(&self, options: &DualCaptureOptions) -> CaptureOutcome {
        if let Err(e) = tokio::fs::create_dir_all(&options.out_dir).await {
            tracing::warn!("Failed to create {:?}: {}", options.out_dir, e);
        }
        let duration = options.duration();

        let native = self.native_guard.lock().await;
        let provider = self.resolve_provider();
        let probe = provider.probe().await;
        tracing::info!(
            "Dual-capture probe: native={} can_dual={:?} details={:?}",
            probe.native_probe_used(),
            probe.can_dual_capture(),
            probe.details().or(probe.error())
        );

        if probe.native_probe_used() && probe.can_dual_capture() == Some(true) {
            match provider.capture(&options.out_dir, duration).await {
                Ok(summary) if summary.success => {
                    tracing::info!(
                        "Native capture saved {} color and {} infrared frames",
                        summary.color_frames_saved,
                        summary.infra_frames_saved
                    );
                    return CaptureOutcome::Native(summary);
                }
                Ok(summary) => tracing::warn!(
                    "Native capture reported failure ({}), falling back to two transcoder streams",
                    summary.details.as_deref().unwrap_or("no details")
                ),
                Err(e) => tracing::warn!(
                    "Native capture failed ({}), falling back to two transcoder streams",
                    e
                ),
            }
        } else {
            tracing::info!("Native tier not applicable");
        }
        drop(native);

        let devices = match probe.devices() {
            Some(devices) => devices.to_vec(),
            None => self.devices.detect_cameras().await,
        };

        if devices.len() >= 2 {
            tracing::info!(
                "Attempting two transcoder streams: '{}' and '{}'",
                devices[0].name,
                devices[1].name
            );
            match self.capture_two_streams(&devices, options).await {
                Ok((color, infra)) => return CaptureOutcome::DualProcess { color, infra },
                Err(e) => tracing::warn!(
                    "Two-stream capture failed to start ({}), falling back to a single camera",
                    e
                ),
            }
        } else {
            tracing::warn!(
                "Two-stream capture needs two cameras, found {}; falling back to a single camera",
                devices.len()
            );
        }

        self.capture_single(&devices, options).await
    }

    /// Run both streams to completion; fails only if either cannot be spawned
    async fn capture_two_streams(
        &self,
        devices: &[CameraDevice],
        options: &DualCaptureOptions,
    ) -> std::io::Result<(StreamResult, StreamResult)> {
        let duration = options.duration();
        let color_dir = options.out_dir.join("color");
        let infra_dir = options.out_dir.join("infra");
        tokio::fs::create_dir_all(&color_dir).await?;
        tokio::fs::create_dir_all(&infra_dir).await?;

        let color = self.spawn_stream(
            &devices[0],
            timestamped_path(&color_dir, "color", "mp4"),
            duration,
            "color",
        )?;
        let infra = match self.spawn_stream(
            &devices[1],
            timestamped_path(&infra_dir, "infra", "mp4"),
            duration,
            "infra",
        ) {
            Ok(infra) => infra,
            Err(e) => {
                let mut color = color;
                if let Err(kill_err) = color.child.kill().await {
                    tracing::warn!("{}: failed to kill sibling stream: {}", color.label, kill_err);
                }
                return Err(e);
            }
        };

        // Join, not race: one stream ending never cancels the other
        Ok(tokio::join!(finish_stream(color), finish_stream(infra)))
    }

    fn spawn_stream(
        &self,
        device: &CameraDevice,
        output: PathBuf,
        duration_secs: u64,
        role: &str,
    ) -> std::io::Result<StreamProcess> {
        let args = CaptureCommandBuilder::for_stream(device, &output, duration_secs).build();
        tracing::info!("{} stream command: {:?} {}", role, self.ffmpeg_path, args.join(" "));

        let child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        Ok(StreamProcess {
            child,
            device: device.name.clone(),
            output,
            label: format!("ffmpeg[{}:{}]", role, device.name),
        })
    }

    async fn capture_single(
        &self,
        devices: &[CameraDevice],
        options: &DualCaptureOptions,
    ) -> CaptureOutcome {
        let Some(device) = devices.first() else {
            tracing::warn!("No camera available for single-camera capture; nothing recorded");
            return CaptureOutcome::Nothing;
        };

        let duration = options.duration();
        let output = timestamped_path(&options.out_dir, "fallback_color", "mp4");
        let recording = RecordingOptions::new(&output)
            .with_duration(duration)
            .with_fps(self.defaults.fps)
            .with_resolution(self.defaults.resolution.clone());

        tracing::info!("Single-camera capture of '{}' to {:?}", device.name, output);
        if let Err(e) = self.session.start(Some(device), &recording).await {
            tracing::warn!("Single-camera capture failed to start: {}", e);
            return CaptureOutcome::Nothing;
        }

        let limit = Duration::from_secs(duration).saturating_add(COMPLETION_SLACK);
        match self.session.wait_for_completion(limit).await {
            Some(RecordingState::Stopped) => CaptureOutcome::Single { output },
            Some(state) => {
                tracing::warn!("Single-camera capture ended as {:?}", state);
                CaptureOutcome::Nothing
            }
            None => {
                tracing::warn!("Single-camera capture still running after {:?}, stopping", limit);
                if let Err(e) = self.session.stop().await {
                    tracing::warn!("Failed to stop single-camera capture: {}", e);
                }
                if output.exists() {
                    CaptureOutcome::Single { output }
                } else {
                    CaptureOutcome::Nothing
                }
            }
        }
    }
}

/// Wait for one stream to exit while draining its diagnostics
async fn finish_stream(mut stream: StreamProcess) -> StreamResult {
    let buffer = Mutex::new(LineBuffer::new(TAIL_CAPACITY));
    let (signal, _started) = StartSignal::channel();
    let stderr = stream.child.stderr.take();
    let label = stream.label.clone();

    let drain = async {
        if let Some(stderr) = stderr {
            drain_diagnostics(stderr, &buffer, signal, &label).await;
        }
    };
    let (status, ()) = tokio::join!(stream.child.wait(), drain);

    let exit_code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!("{}: failed to collect exit status: {}", label, e);
            None
        }
    };
    if exit_code == Some(0) {
        tracing::info!("{}: finished writing {:?}", label, stream.output);
    } else {
        tracing::warn!(
            "{}: exited with code {:?}: {}",
            label,
            exit_code,
            buffer
                .lock()
                .tail()
                .last()
                .cloned()
                .unwrap_or_else(|| "no diagnostic output".to_string())
        );
    }

    StreamResult {
        device: stream.device,
        output: stream.output,
        exit_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FfmpegDeviceEnumerator;
    use crate::dual::native::NativeHelperError;
    use crate::dual::types::{NativeCaptureSummary, NativeProbeReport};
    use crate::test_support::StaticDevices;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Provider answering from canned values
    struct FakeProvider {
        can_dual_capture: bool,
        capture_succeeds: bool,
        captures: AtomicUsize,
    }

    impl FakeProvider {
        fn native(can_dual_capture: bool, capture_succeeds: bool) -> Arc<Self> {
            Arc::new(Self {
                can_dual_capture,
                capture_succeeds,
                captures: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DualCaptureProvider for FakeProvider {
        async fn probe(&self) -> ProbeResult {
            ProbeResult::Native {
                report: NativeProbeReport {
                    can_dual_capture: self.can_dual_capture,
                    groups: Vec::new(),
                    details: Some("fake".to_string()),
                },
                probe_output: serde_json::json!({ "canDualCapture": self.can_dual_capture }),
            }
        }

        async fn capture(
            &self,
            out_dir: &Path,
            _duration_secs: u64,
        ) -> Result<NativeCaptureSummary, NativeHelperError> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            if self.capture_succeeds {
                Ok(NativeCaptureSummary {
                    success: true,
                    color_frames_saved: 30,
                    infra_frames_saved: 30,
                    out_dir: Some(out_dir.display().to_string()),
                    details: None,
                })
            } else {
                Err(NativeHelperError::Exit {
                    code: Some(2),
                    output: "{\"success\": false}".to_string(),
                })
            }
        }
    }

    fn config(ffmpeg: &Path, helper_dir: &Path, test_mode: bool) -> AppConfig {
        AppConfig {
            test_mode,
            ffmpeg_path: ffmpeg.to_path_buf(),
            native_helper_dir: helper_dir.to_path_buf(),
            ..AppConfig::default()
        }
    }

    fn coordinator(config: &AppConfig, devices: impl DeviceSource + 'static) -> DualCaptureCoordinator {
        let session = Arc::new(RecordingSession::new(&config.ffmpeg_path, config.test_mode));
        DualCaptureCoordinator::new(config, Arc::new(devices), session)
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_probe_without_helper_counts_devices() {
        let helper_dir = tempdir().unwrap();
        let config = config(Path::new("/nonexistent/ffmpeg"), helper_dir.path(), false);

        let two = coordinator(&config, StaticDevices::named(&["Color", "Infrared"]));
        let probe = two.probe().await;
        assert_eq!(probe.can_dual_capture(), Some(true));
        assert!(!probe.native_probe_used());

        let one = coordinator(&config, StaticDevices::named(&["Color"]));
        assert_eq!(one.probe().await.can_dual_capture(), Some(false));
    }

    #[tokio::test]
    async fn test_native_success_short_circuits() {
        let out = tempdir().unwrap();
        let config = config(Path::new("/nonexistent/ffmpeg"), out.path(), false);
        let provider = FakeProvider::native(true, true);
        let coordinator = coordinator(&config, StaticDevices::named(&["Color", "Infrared"]))
            .with_provider(provider.clone());

        let outcome = coordinator
            .start_dual_capture(&DualCaptureOptions::new(out.path().join("dual")))
            .await;

        assert!(matches!(outcome, CaptureOutcome::Native(ref s) if s.success));
        assert_eq!(provider.captures.load(Ordering::SeqCst), 1);
        assert!(!out.path().join("dual").join("color").exists());
    }

    #[tokio::test]
    async fn test_native_not_capable_skips_native_capture() {
        let out = tempdir().unwrap();
        let config = config(Path::new("/nonexistent/ffmpeg"), out.path(), false);
        let provider = FakeProvider::native(false, true);
        let coordinator =
            coordinator(&config, StaticDevices::named(&[])).with_provider(provider.clone());

        let outcome = coordinator
            .start_dual_capture(&DualCaptureOptions::new(out.path()))
            .await;

        assert_eq!(outcome, CaptureOutcome::Nothing);
        assert_eq!(provider.captures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_devices_no_helper_produces_nothing() {
        let helper_dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        let out_dir = out.path().join("capture");
        let config = config(Path::new("/nonexistent/ffmpeg"), helper_dir.path(), false);
        let coordinator = coordinator(&config, StaticDevices::named(&[]));

        let outcome = coordinator
            .start_dual_capture(&DualCaptureOptions::new(&out_dir).with_duration(1))
            .await;

        assert_eq!(outcome, CaptureOutcome::Nothing);
        assert!(out_dir.is_dir());
        assert_eq!(file_count(&out_dir), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_falls_through_to_single() {
        let helper_dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        let config = config(Path::new("/nonexistent/ffmpeg"), helper_dir.path(), false);
        let coordinator = coordinator(&config, StaticDevices::named(&["Color", "Infrared"]));

        let outcome = coordinator
            .start_dual_capture(&DualCaptureOptions::new(out.path()).with_duration(1))
            .await;

        // The single tier also cannot spawn, so the cascade ends empty
        assert_eq!(outcome, CaptureOutcome::Nothing);
        assert_eq!(file_count(&out.path().join("color")), 0);
        assert_eq!(coordinator.session.state(), RecordingState::Failed);
    }

    #[tokio::test]
    async fn test_single_tier_in_test_mode() {
        let out = tempdir().unwrap();
        let config = config(Path::new("ffmpeg"), out.path(), true);
        let coordinator = coordinator(&config, FfmpegDeviceEnumerator::new("ffmpeg", true));

        let outcome = coordinator
            .start_dual_capture(&DualCaptureOptions::new(out.path()).with_duration(1))
            .await;

        let output = match outcome {
            CaptureOutcome::Single { output } => output,
            other => panic!("expected single-camera outcome, got {:?}", other),
        };
        let name = output.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("fallback_color_"));
        assert!(std::fs::metadata(&output).unwrap().len() > 0);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::test_support::write_script;
        use std::time::Instant;

        const SLOW_TRANSCODER: &str = "for last; do :; done\nsleep 1\necho recorded > \"$last\"\n";

        #[tokio::test]
        async fn test_native_failure_joins_both_streams() {
            let bin = tempdir().unwrap();
            let out = tempdir().unwrap();
            let ffmpeg = write_script(bin.path(), "ffmpeg", SLOW_TRANSCODER);
            let config = config(&ffmpeg, bin.path(), false);
            let provider = FakeProvider::native(true, false);
            let coordinator = coordinator(&config, StaticDevices::named(&["Color", "Infrared"]))
                .with_provider(provider.clone());

            let started = Instant::now();
            let outcome = coordinator
                .start_dual_capture(&DualCaptureOptions::new(out.path()).with_duration(1))
                .await;

            assert_eq!(provider.captures.load(Ordering::SeqCst), 1);
            let (color, infra) = match outcome {
                CaptureOutcome::DualProcess { color, infra } => (color, infra),
                other => panic!("expected dual-process outcome, got {:?}", other),
            };
            assert!(started.elapsed() >= Duration::from_secs(1));
            assert!(color.succeeded() && infra.succeeded());
            assert_eq!(color.device, "Color");
            assert_eq!(infra.device, "Infrared");
            assert!(color.output.starts_with(out.path().join("color")));
            assert!(infra.output.starts_with(out.path().join("infra")));
            assert!(color.output.exists());
            assert!(infra.output.exists());
        }

        #[tokio::test]
        async fn test_failing_stream_does_not_cancel_sibling() {
            let bin = tempdir().unwrap();
            let out = tempdir().unwrap();
            let ffmpeg = write_script(
                bin.path(),
                "ffmpeg",
                "case \"$*\" in\n\
                 *video=Broken*) echo 'I/O error' >&2; exit 1;;\n\
                 esac\n\
                 for last; do :; done\nsleep 1\necho recorded > \"$last\"\n",
            );
            let config = config(&ffmpeg, bin.path(), false);
            let coordinator = coordinator(&config, StaticDevices::named(&["Broken", "Infrared"]));

            let outcome = coordinator
                .start_dual_capture(&DualCaptureOptions::new(out.path()).with_duration(1))
                .await;

            let (color, infra) = match outcome {
                CaptureOutcome::DualProcess { color, infra } => (color, infra),
                other => panic!("expected dual-process outcome, got {:?}", other),
            };
            assert_eq!(color.exit_code, Some(1));
            assert!(infra.succeeded());
            assert!(infra.output.exists());
        }

        #[tokio::test]
        async fn test_native_helper_on_disk() {
            let helper_dir = tempdir().unwrap();
            let out = tempdir().unwrap();
            write_script(
                helper_dir.path(),
                "MediaProbe",
                "case \"$1\" in\n\
                 probe) echo '{\"canDualCapture\": true, \"groups\": [], \"details\": \"2 sources\"}';;\n\
                 capture) echo '{\"success\": true, \"colorFramesSaved\": 10, \"infraFramesSaved\": 9}';;\n\
                 *) echo '{\"error\": \"unknown directive\"}'; exit 2;;\n\
                 esac\n",
            );
            let config = config(Path::new("/nonexistent/ffmpeg"), helper_dir.path(), false);
            let coordinator = coordinator(&config, StaticDevices::named(&[]));

            let probe = coordinator.probe().await;
            assert!(probe.native_probe_used());
            assert_eq!(probe.details(), Some("2 sources"));

            let outcome = coordinator
                .start_dual_capture(&DualCaptureOptions::new(out.path()))
                .await;
            match outcome {
                CaptureOutcome::Native(summary) => assert_eq!(summary.infra_frames_saved, 9),
                other => panic!("expected native outcome, got {:?}", other),
            }
        }
    }
}
