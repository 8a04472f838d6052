//! Recording system module
//!
//! This module implements single-device recording:
//! - `ffmpeg` builds the transcoder command line
//! - `monitor` turns the transcoder's diagnostic stream into lines and a start signal
//! - `session` owns the lifecycle of the one active recording
//! - `state` holds the state machine, options and errors

pub mod ffmpeg;
pub mod monitor;
pub mod session;
pub mod state;

pub use session::{RecordingSession, COMPLETION_SLACK};
pub use state::{
    parse_resolution, RecordingError, RecordingOptions, RecordingResult, RecordingState,
    SessionOutcome, MAX_DURATION_SECS,
};
