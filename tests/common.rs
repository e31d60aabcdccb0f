#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use consult_recorder::backend::{BackendError, ConsultationBackend};
use consult_recorder::capture::SyntheticCamera;
use consult_recorder::consultation::{AuthContext, ConsultationForm, ConsultationRecord, Role};
use consult_recorder::delivery::DownloadDirectory;
use consult_recorder::recorder::{Segment, SessionId, UploadLedger};
use consult_recorder::RecordingManager;
use parking_lot::Mutex;
use tempfile::TempDir;

/// In-memory backend that records every call
#[derive(Default)]
pub struct MemoryBackend {
    /// Sequence indices whose upload is rejected
    pub failing_chunks: BTreeSet<u64>,
    /// Rejects the consultation with this body message
    pub reject_consultation: Option<String>,
    pub chunks: Mutex<Vec<(SessionId, u64, Bytes)>>,
    pub consultations: Mutex<Vec<(ConsultationRecord, String)>>,
}

impl MemoryBackend {
    pub fn failing_chunks(sequences: impl IntoIterator<Item = u64>) -> Self {
        Self {
            failing_chunks: sequences.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn rejecting_consultation(message: &str) -> Self {
        Self {
            reject_consultation: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn chunk_sequences(&self) -> Vec<u64> {
        let mut sequences: Vec<u64> = self.chunks.lock().iter().map(|(_, seq, _)| *seq).collect();
        sequences.sort_unstable();
        sequences
    }

    /// Payloads in sequence order
    pub fn chunk_payloads(&self) -> Vec<Bytes> {
        let mut chunks: Vec<(u64, Bytes)> = self
            .chunks
            .lock()
            .iter()
            .map(|(_, seq, payload)| (*seq, payload.clone()))
            .collect();
        chunks.sort_by_key(|(seq, _)| *seq);
        chunks.into_iter().map(|(_, payload)| payload).collect()
    }

    pub fn call_count(&self) -> usize {
        self.chunks.lock().len() + self.consultations.lock().len()
    }
}

#[async_trait]
impl ConsultationBackend for MemoryBackend {
    async fn upload_chunk(&self, session_id: &SessionId, segment: &Segment) -> Result<(), BackendError> {
        self.chunks
            .lock()
            .push((session_id.clone(), segment.sequence_index, segment.payload.clone()));
        if self.failing_chunks.contains(&segment.sequence_index) {
            return Err(BackendError::Rejected {
                status: 503,
                message: None,
            });
        }
        Ok(())
    }

    async fn create_consultation(&self, record: &ConsultationRecord, token: &str) -> Result<(), BackendError> {
        if let Some(message) = &self.reject_consultation {
            return Err(BackendError::Rejected {
                status: 400,
                message: Some(message.clone()),
            });
        }
        self.consultations
            .lock()
            .push((record.clone(), token.to_string()));
        Ok(())
    }
}

pub fn form() -> ConsultationForm {
    ConsultationForm {
        patient_name: "Jane Doe".into(),
        uhid_id: "U123".into(),
        attender_name: "Sam Doe".into(),
        icu_consultant_name: "Dr. Rao".into(),
        doctor_name: "Dr. Iyer".into(),
    }
}

pub fn auth() -> AuthContext {
    AuthContext {
        user_id: "doctor-42".into(),
        token: "token-abc".into(),
        role: Role::Doctor,
    }
}

pub struct Harness {
    pub manager: RecordingManager,
    pub backend: Arc<MemoryBackend>,
    pub downloads: TempDir,
}

pub fn harness(camera: SyntheticCamera, backend: MemoryBackend) -> Harness {
    let downloads = TempDir::new().unwrap();
    let backend = Arc::new(backend);
    let manager = RecordingManager::new(
        Arc::new(camera),
        backend.clone(),
        Arc::new(DownloadDirectory::new(downloads.path())),
        auth(),
    );
    Harness {
        manager,
        backend,
        downloads,
    }
}

/// Wait for in-flight uploads to resolve
pub async fn settle(ledger: &UploadLedger) {
    while ledger.counts().pending > 0 {
        tokio::task::yield_now().await;
    }
}
