//! Dual-source capture
//!
//! - `types` holds the probe results and capture outcomes
//! - `native` runs the out-of-process helper
//! - `provider` puts the helper and the device-count heuristic behind one trait
//! - `coordinator` runs the fallback cascade

pub mod coordinator;
pub mod native;
pub mod provider;
pub mod types;

pub use coordinator::DualCaptureCoordinator;
pub use native::{NativeHelper, NativeHelperError};
pub use provider::{DualCaptureProvider, HeuristicProvider, NativeHelperProvider};
pub use types::{CaptureOutcome, DualCaptureOptions, ProbeResult, StreamResult};
