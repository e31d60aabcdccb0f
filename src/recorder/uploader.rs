//! Segment uploader
//!
//! Fire-and-forget streaming of segments to the backend. Each upload runs on
//! its own task; failures are logged and recorded in the [`UploadLedger`], and
//! never reach the recording path.

use super::state::{Segment, SessionId, UploadState};
use crate::backend::ConsultationBackend;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Upload outcome per sequence index
#[derive(Debug, Default)]
pub struct UploadLedger {
    states: Mutex<BTreeMap<u64, UploadState>>,
}

/// Snapshot of ledger counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadCounts {
    pub pending: usize,
    pub sent: usize,
    pub failed: usize,
}

impl UploadLedger {
    fn mark(&self, sequence_index: u64, state: UploadState) {
        self.states.lock().insert(sequence_index, state);
    }

    pub fn state(&self, sequence_index: u64) -> Option<UploadState> {
        self.states.lock().get(&sequence_index).copied()
    }

    pub fn counts(&self) -> UploadCounts {
        let states = self.states.lock();
        let mut counts = UploadCounts::default();
        for state in states.values() {
            match state {
                UploadState::Pending => counts.pending += 1,
                UploadState::Sent => counts.sent += 1,
                UploadState::UploadFailed => counts.failed += 1,
            }
        }
        counts
    }

    /// Sequence indices whose upload failed
    pub fn failed(&self) -> Vec<u64> {
        self.states
            .lock()
            .iter()
            .filter(|(_, state)| **state == UploadState::UploadFailed)
            .map(|(index, _)| *index)
            .collect()
    }
}

pub struct SegmentUploader {
    backend: Arc<dyn ConsultationBackend>,
    ledger: Arc<UploadLedger>,
}

impl SegmentUploader {
    pub fn new(backend: Arc<dyn ConsultationBackend>) -> Self {
        Self {
            backend,
            ledger: Arc::new(UploadLedger::default()),
        }
    }

    pub fn ledger(&self) -> Arc<UploadLedger> {
        self.ledger.clone()
    }

    /// Start uploading `segment` and return immediately
    pub fn upload(&self, session_id: &SessionId, segment: &Segment) {
        if segment.is_empty() {
            tracing::debug!(
                session_id = %session_id,
                sequence = segment.sequence_index,
                "Skipping upload of empty segment"
            );
            return;
        }

        let sequence = segment.sequence_index;
        self.ledger.mark(sequence, UploadState::Pending);

        let backend = self.backend.clone();
        let ledger = self.ledger.clone();
        let session_id = session_id.clone();
        let segment = segment.clone();
        tokio::spawn(async move {
            match backend.upload_chunk(&session_id, &segment).await {
                Ok(()) => ledger.mark(sequence, UploadState::Sent),
                Err(err) => {
                    tracing::warn!(
                        session_id = %session_id,
                        sequence,
                        "Failed to upload chunk: {}",
                        err
                    );
                    ledger.mark(sequence, UploadState::UploadFailed);
                }
            }
        });
    }
}
