//! Recording state management
//!
//! Defines the session state machine, the session record, and segments.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Current status of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No recording in progress
    #[default]
    Idle,
    /// Device held, encoder running
    Recording,
    /// Stop requested, draining and finalizing
    Stopping,
    /// Record persisted
    Finalized,
    /// Finalize failed; start a new session to recover
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Finalized | SessionStatus::Failed)
    }

    /// Whether a session currently owns the capture device
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Recording | SessionStatus::Stopping)
    }
}

/// Opaque, never-reused session token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(format!("session_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One recording attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub session_id: SessionId,

    pub status: SessionStatus,

    /// When the device and encoder were confirmed live
    pub started_at: DateTime<Utc>,

    /// Frozen once the session stops
    pub elapsed_seconds: u64,
}

impl RecordingSession {
    /// Create a session starting now
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            status: SessionStatus::Recording,
            started_at: Utc::now(),
            elapsed_seconds: 0,
        }
    }
}

/// Per-segment upload outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Pending,
    Sent,
    UploadFailed,
}

/// A chunk of encoded media emitted at a fixed cadence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Emission order, contiguous from 0 within a session
    pub sequence_index: u64,

    pub payload: Bytes,

    /// Tail emitted by the stop flush
    pub is_final: bool,
}

impl Segment {
    pub fn new(sequence_index: u64, payload: Bytes, is_final: bool) -> Self {
        Self {
            sequence_index,
            payload,
            is_final,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
