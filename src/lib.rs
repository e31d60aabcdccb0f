//! Consult Recorder - record clinical consultations, made reliable.
//!
//! This is the main library crate. It provides the recording-session lifecycle:
//! device acquisition, continuous encoding into segments, per-segment upload,
//! and the finalize sequence that delivers the artifact and persists the
//! consultation record.

pub mod artifact;
pub mod backend;
pub mod capture;
pub mod config;
pub mod consultation;
pub mod delivery;
pub mod encoder;
pub mod recorder;
pub mod utils;

pub use recorder::{RecordingEvent, RecordingManager};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn init_tracing(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("consult_recorder={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
