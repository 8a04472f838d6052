//! dualcam - headless camera capture with dual-source fallback.
//!
//! This is the library crate behind the `dualcam` daemon. It discovers
//! cameras through ffmpeg, records short clips, tries to capture two sources
//! at once through a native helper or two transcoder processes, and hands
//! finished recordings to remote storage.

pub mod capture;
pub mod config;
pub mod dual;
pub mod orchestrator;
pub mod recorder;
pub mod tuning;
pub mod upload;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::AppConfig;
pub use orchestrator::{IterationOutcome, Orchestrator};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dualcam=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting dualcam v{}", env!("CARGO_PKG_VERSION"));
}
