//! Finalize sequence
//!
//! Runs once the segment stream has completed: assemble the artifact, correct
//! its duration, deliver it locally, then persist the consultation record.
//! The first failing step aborts the rest.

use super::state::{RecordingSession, Segment};
use crate::artifact::{self, ContainerFormat, DurationFixError};
use crate::backend::{BackendError, ConsultationBackend};
use crate::consultation::{AuthContext, ConsultationForm, ConsultationRecord};
use crate::delivery::{ArtifactDelivery, DeliveryError};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

/// Finalize errors
#[derive(Error, Debug)]
pub enum FinalizeError {
    #[error("no data recorded")]
    NoData,

    #[error("Failed to correct recording duration: {0}")]
    Duration(#[from] DurationFixError),

    #[error("Failed to save recording: {0}")]
    Delivery(#[from] DeliveryError),

    /// The user already has the file; only the record is missing
    #[error("{message}")]
    Persist { message: String },
}

impl From<BackendError> for FinalizeError {
    fn from(err: BackendError) -> Self {
        FinalizeError::Persist {
            message: err.user_message(),
        }
    }
}

pub struct Finalizer {
    container: ContainerFormat,
    delivery: Arc<dyn ArtifactDelivery>,
    backend: Arc<dyn ConsultationBackend>,
    auth: AuthContext,
}

impl Finalizer {
    pub fn new(
        container: ContainerFormat,
        delivery: Arc<dyn ArtifactDelivery>,
        backend: Arc<dyn ConsultationBackend>,
        auth: AuthContext,
    ) -> Self {
        Self {
            container,
            delivery,
            backend,
            auth,
        }
    }

    pub async fn finalize(
        &self,
        session: &RecordingSession,
        segments: &[Segment],
        form: &ConsultationForm,
    ) -> Result<ConsultationRecord, FinalizeError> {
        if segments.iter().all(|s| s.is_empty()) {
            return Err(FinalizeError::NoData);
        }
        check_sequence(session, segments);

        let assembled = artifact::assemble(segments);
        let corrected = artifact::correct_duration(self.container, &assembled, session.elapsed_seconds)?;

        let file_name = artifact::file_name(form, self.container);
        let path = self.delivery.deliver(&file_name, &corrected).await?;
        tracing::info!(
            session_id = %session.session_id,
            "Recording delivered to {:?} ({} segments, {}s)",
            path,
            segments.len(),
            session.elapsed_seconds
        );

        let record = ConsultationRecord::completed(
            form,
            &self.auth,
            session.elapsed_seconds,
            file_name,
            Utc::now(),
        );
        self.backend
            .create_consultation(&record, &self.auth.token)
            .await?;

        Ok(record)
    }
}

/// Log gaps or reordering in the segment sequence
fn check_sequence(session: &RecordingSession, segments: &[Segment]) {
    for (expected, segment) in segments.iter().enumerate() {
        if segment.sequence_index != expected as u64 {
            tracing::error!(
                session_id = %session.session_id,
                expected,
                found = segment.sequence_index,
                "Segment sequence has a gap; a segment was dropped"
            );
            return;
        }
    }
}
