//! Recording system module
//!
//! This module implements the recording-session lifecycle:
//! - `RecordingManager` to drive one session at a time
//! - `SessionTimer` for the elapsed-seconds display
//! - `SegmentUploader` for fire-and-forget segment streaming
//! - `Finalizer` for the artifact and record hand-off at stop

pub mod error;
pub mod finalizer;
pub mod manager;
pub mod state;
pub mod timer;
pub mod uploader;

pub use error::{RecordingError, RecordingResult};
pub use finalizer::{FinalizeError, Finalizer};
pub use manager::{RecordingEvent, RecordingManager};
pub use state::{RecordingSession, Segment, SessionId, SessionStatus, UploadState};
pub use timer::{format_elapsed, SessionTimer};
pub use uploader::{SegmentUploader, UploadCounts, UploadLedger};
