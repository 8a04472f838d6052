//! Recording session
//!
//! Owns the lifecycle of the single active recording:
//! 1. Spawning the transcoder with arguments from [`CaptureCommandBuilder`].
//! 2. Confirming start from the diagnostic stream or a grace period.
//! 3. Supervising the process until it exits and is reaped.
//! 4. Interrupting it on request.

use super::ffmpeg::CaptureCommandBuilder;
use super::monitor::{drain_diagnostics, LineBuffer, StartSignal, TAIL_CAPACITY};
use super::state::{
    RecordingError, RecordingOptions, RecordingResult, RecordingState, SessionOutcome,
};
use crate::capture::CameraDevice;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// How long a silent but live transcoder is given before it counts as started
pub const START_GRACE_PERIOD: Duration = Duration::from_millis(2000);

/// How long an interrupted transcoder may take to exit before it is killed
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed past a duration cap before a capped recording is stopped
pub const COMPLETION_SLACK: Duration = Duration::from_secs(2);

/// Bytes written in place of a recording in test mode
pub const TEST_MODE_PLACEHOLDER: &[u8] = b"MOCK_VIDEO_DATA";

const DEFAULT_TEST_DURATION_SECS: u64 = 5;

/// Handle the session keeps on a running recording
struct ActiveControl {
    stop_tx: oneshot::Sender<()>,
    output_path: PathBuf,
}

/// What the supervisor tells a pending `start` when the process exits
struct ExitReport {
    code: Option<i32>,
    stop_requested: bool,
    tail: Vec<String>,
}

/// Single-slot recorder
///
/// At most one recording is `Starting`/`Recording` at a time. The slot is
/// claimed with one check-and-set on the state cell, made while holding the
/// control lock, so an active slot always has a stop handle.
pub struct RecordingSession {
    ffmpeg_path: PathBuf,
    test_mode: bool,
    grace_period: Duration,
    stop_timeout: Duration,
    state: Arc<watch::Sender<RecordingState>>,
    control: Arc<Mutex<Option<ActiveControl>>>,
    last_outcome: Arc<Mutex<Option<SessionOutcome>>>,
}

impl RecordingSession {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, test_mode: bool) -> Self {
        let (state, _) = watch::channel(RecordingState::Idle);
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            test_mode,
            grace_period: START_GRACE_PERIOD,
            stop_timeout: STOP_TIMEOUT,
            state: Arc::new(state),
            control: Arc::new(Mutex::new(None)),
            last_outcome: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Current state of the slot
    pub fn state(&self) -> RecordingState {
        *self.state.borrow()
    }

    pub fn is_recording(&self) -> bool {
        self.state().is_active()
    }

    /// How the most recent session ended
    pub fn last_outcome(&self) -> Option<SessionOutcome> {
        self.last_outcome.lock().clone()
    }

    /// Start recording `device` and return once it is confirmed underway
    pub async fn start(
        &self,
        device: Option<&CameraDevice>,
        options: &RecordingOptions,
    ) -> RecordingResult<()> {
        let device = device.ok_or(RecordingError::NoDeviceSelected)?;
        options.validate()?;
        let mut claim = self.try_acquire(&options.output_path)?;

        tracing::info!(
            "Starting recording of '{}' to {:?}",
            device.name,
            options.output_path
        );

        if let Some(parent) = options
            .output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                claim.release(RecordingState::Failed, false);
                return Err(e.into());
            }
        }

        if claim.stop_requested() {
            tracing::info!("Recording to {:?} stopped before it started", options.output_path);
            claim.release(RecordingState::Stopped, true);
            return Ok(());
        }

        if self.test_mode {
            return self.simulate(claim, options).await;
        }
        self.spawn_and_confirm(claim, device, options).await
    }

    /// Interrupt the active recording and wait for it to be reaped
    pub async fn stop(&self) -> RecordingResult<()> {
        let control = self
            .control
            .lock()
            .take()
            .ok_or(RecordingError::NoActiveSession)?;

        tracing::info!("Stopping recording to {:?}", control.output_path);
        let _ = control.stop_tx.send(());

        // The supervisor escalates to a kill after `stop_timeout`
        if self
            .wait_for_completion(self.stop_timeout + Duration::from_secs(1))
            .await
            .is_none()
        {
            tracing::warn!("Recording did not report completion after stop");
        }
        Ok(())
    }

    /// Wait until the slot is free, returning the state it settled in
    pub async fn wait_for_completion(&self, timeout: Duration) -> Option<RecordingState> {
        let mut rx = self.state.subscribe();
        let settled = match tokio::time::timeout(timeout, rx.wait_for(|s| !s.is_active())).await {
            Ok(Ok(state)) => Some(*state),
            _ => None,
        };
        settled
    }

    fn try_acquire(&self, output_path: &Path) -> RecordingResult<SlotClaim<'_>> {
        let mut control = self.control.lock();
        let acquired = self.state.send_if_modified(|state| {
            if state.is_active() {
                false
            } else {
                *state = RecordingState::Starting;
                true
            }
        });
        if acquired {
            let (stop_tx, stop_rx) = oneshot::channel();
            *control = Some(ActiveControl {
                stop_tx,
                output_path: output_path.to_path_buf(),
            });
            Ok(SlotClaim {
                guard: ClaimGuard {
                    session: self,
                    output_path: output_path.to_path_buf(),
                    armed: true,
                },
                stop_rx,
            })
        } else {
            tracing::warn!("Refusing to start: recording already in progress");
            Err(RecordingError::AlreadyRecording)
        }
    }

    fn confirm_started(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == RecordingState::Starting {
                *state = RecordingState::Recording;
                true
            } else {
                false
            }
        })
    }

    /// Free the slot for a session that never handed its process to a supervisor
    fn settle(&self, output_path: &Path, terminal: RecordingState, stop_requested: bool) {
        self.control.lock().take();
        *self.last_outcome.lock() = Some(SessionOutcome {
            output_path: output_path.to_path_buf(),
            state: terminal,
            exit_code: None,
            stop_requested,
            stderr_tail: Vec::new(),
        });
        self.state.send_replace(terminal);
    }

    /// Test mode: wait out the nominal duration and write a placeholder file
    async fn simulate(
        &self,
        mut claim: SlotClaim<'_>,
        options: &RecordingOptions,
    ) -> RecordingResult<()> {
        self.confirm_started();

        let duration = Duration::from_secs(options.duration.unwrap_or(DEFAULT_TEST_DURATION_SECS));
        let stop_requested = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = &mut claim.stop_rx => true,
        };

        let written = tokio::fs::write(&options.output_path, TEST_MODE_PLACEHOLDER).await;
        let terminal = if written.is_ok() {
            RecordingState::Stopped
        } else {
            RecordingState::Failed
        };
        claim.release(terminal, stop_requested);

        written?;
        tracing::info!("Simulated recording written to {:?}", options.output_path);
        Ok(())
    }

    async fn spawn_and_confirm(
        &self,
        claim: SlotClaim<'_>,
        device: &CameraDevice,
        options: &RecordingOptions,
    ) -> RecordingResult<()> {
        let args = CaptureCommandBuilder::for_session(device, options).build();
        tracing::info!("FFmpeg command: {:?} {}", self.ffmpeg_path, args.join(" "));

        // Off unix the transcoder is stopped with `q` on stdin
        let stdin = if cfg!(unix) {
            Stdio::null()
        } else {
            Stdio::piped()
        };
        let mut child = match Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(stdin)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                claim.release(RecordingState::Failed, false);
                return Err(RecordingError::Spawn(e));
            }
        };

        let label = format!("ffmpeg[{}]", device.name);
        let buffer = Arc::new(Mutex::new(LineBuffer::new(TAIL_CAPACITY)));
        let (signal, mut started_rx) = StartSignal::channel();
        let reader = child.stderr.take().map(|stderr| {
            let buffer = buffer.clone();
            let label = label.clone();
            tokio::spawn(async move {
                drain_diagnostics(stderr, &buffer, signal, &label).await;
            })
        });

        let (exit_tx, mut exit_rx) = oneshot::channel();
        let stop_rx = claim.hand_off();

        tokio::spawn(
            Supervisor {
                child,
                reader,
                buffer,
                stop_rx,
                exit_tx,
                state: self.state.clone(),
                control: self.control.clone(),
                last_outcome: self.last_outcome.clone(),
                output_path: options.output_path.clone(),
                stop_timeout: self.stop_timeout,
                label,
            }
            .run(),
        );

        let grace = tokio::time::sleep(self.grace_period);
        tokio::pin!(grace);

        let early_exit = tokio::select! {
            report = &mut exit_rx => Some(report),
            Ok(()) = &mut started_rx => None,
            _ = &mut grace => None,
        };

        let report = match early_exit {
            Some(report) => report,
            None if self.confirm_started() => {
                tracing::info!("Recording of '{}' confirmed underway", device.name);
                return Ok(());
            }
            // Exited between the signal and the transition
            None => exit_rx.await,
        };

        let report = report.unwrap_or(ExitReport {
            code: None,
            stop_requested: false,
            tail: Vec::new(),
        });
        match report.code {
            _ if report.stop_requested => {
                tracing::info!("Recording stopped before start was confirmed");
                Ok(())
            }
            Some(0) => {
                tracing::info!("Recording finished before start was confirmed");
                Ok(())
            }
            code => Err(RecordingError::StartFailed {
                code,
                context: report.tail.join("\n"),
            }),
        }
    }
}

/// Ownership of the slot between `try_acquire` and a terminal state
struct SlotClaim<'a> {
    guard: ClaimGuard<'a>,
    stop_rx: oneshot::Receiver<()>,
}

impl SlotClaim<'_> {
    /// Whether `stop()` already took the control handle
    fn stop_requested(&mut self) -> bool {
        !matches!(self.stop_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty))
    }

    fn release(self, terminal: RecordingState, stop_requested: bool) {
        let mut guard = self.guard;
        guard.armed = false;
        guard
            .session
            .settle(&guard.output_path, terminal, stop_requested);
    }

    /// The supervisor now settles the slot and listens for stop
    fn hand_off(self) -> oneshot::Receiver<()> {
        let SlotClaim { mut guard, stop_rx } = self;
        guard.armed = false;
        stop_rx
    }
}

/// Dropping an armed guard (e.g. a cancelled `start`) marks the slot failed
/// so it is never left active without an owner.
struct ClaimGuard<'a> {
    session: &'a RecordingSession,
    output_path: PathBuf,
    armed: bool,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("Recording to {:?} abandoned before completion", self.output_path);
            self.session
                .settle(&self.output_path, RecordingState::Failed, false);
        }
    }
}

/// Task that exclusively owns a transcoder process until it is reaped
struct Supervisor {
    child: Child,
    reader: Option<JoinHandle<()>>,
    buffer: Arc<Mutex<LineBuffer>>,
    stop_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<ExitReport>,
    state: Arc<watch::Sender<RecordingState>>,
    control: Arc<Mutex<Option<ActiveControl>>>,
    last_outcome: Arc<Mutex<Option<SessionOutcome>>>,
    output_path: PathBuf,
    stop_timeout: Duration,
    label: String,
}

impl Supervisor {
    async fn run(self) {
        let Supervisor {
            mut child,
            reader,
            buffer,
            mut stop_rx,
            exit_tx,
            state,
            control,
            last_outcome,
            output_path,
            stop_timeout,
            label,
        } = self;

        // A dropped sender (session gone) counts as a stop request
        let (status, stop_requested) = tokio::select! {
            status = child.wait() => (status, false),
            _ = &mut stop_rx => {
                interrupt(&mut child, &label).await;
                let status = match tokio::time::timeout(stop_timeout, child.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        tracing::warn!("{}: still running {:?} after interrupt, killing", label, stop_timeout);
                        if let Err(e) = child.kill().await {
                            tracing::warn!("{}: kill failed: {}", label, e);
                        }
                        child.wait().await
                    }
                };
                (status, true)
            }
        };

        if let Some(reader) = reader {
            let _ = tokio::time::timeout(Duration::from_millis(500), reader).await;
        }

        let code = match &status {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!("{}: failed to collect exit status: {}", label, e);
                None
            }
        };
        let tail = buffer.lock().tail();
        let terminal = if stop_requested || code == Some(0) {
            RecordingState::Stopped
        } else {
            RecordingState::Failed
        };

        control.lock().take();
        *last_outcome.lock() = Some(SessionOutcome {
            output_path: output_path.clone(),
            state: terminal,
            exit_code: code,
            stop_requested,
            stderr_tail: tail.clone(),
        });

        let mut was_recording = false;
        state.send_modify(|s| {
            was_recording = *s == RecordingState::Recording;
            *s = terminal;
        });

        match (terminal, was_recording) {
            (RecordingState::Stopped, _) => {
                tracing::info!("{}: recording finished with code {:?}", label, code);
            }
            (_, true) => {
                tracing::warn!(
                    "{}: recording to {:?} failed after start with code {:?}: {}",
                    label,
                    output_path,
                    code,
                    tail.last().map(String::as_str).unwrap_or("no diagnostic output")
                );
            }
            _ => {
                tracing::debug!("{}: exited with code {:?} before start was confirmed", label, code);
            }
        }

        let _ = exit_tx.send(ExitReport {
            code,
            stop_requested,
            tail,
        });
    }
}

/// Ask the transcoder to finish its file and exit
async fn interrupt(child: &mut Child, label: &str) {
    #[cfg(not(unix))]
    {
        use tokio::io::AsyncWriteExt;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(b"q").await {
                Ok(()) => {
                    tracing::info!("{}: sent 'q'", label);
                    return;
                }
                Err(e) => tracing::warn!("{}: failed to send 'q': {}", label, e),
            }
        }
    }

    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: the pid belongs to our child, which has not been reaped yet
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
            if rc == 0 {
                tracing::info!("{}: sent SIGINT", label);
                return;
            }
            tracing::warn!(
                "{}: SIGINT failed: {}",
                label,
                std::io::Error::last_os_error()
            );
        }
    }

    if let Err(e) = child.start_kill() {
        tracing::warn!("{}: failed to terminate: {}", label, e);
    }
}
