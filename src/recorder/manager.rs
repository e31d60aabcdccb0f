//! Recording manager
//!
//! Owns the session state machine and drives one session at a time through
//! acquire, record, stop and finalize.

use super::error::{RecordingError, RecordingResult};
use super::finalizer::Finalizer;
use super::state::{RecordingSession, Segment, SessionId, SessionStatus};
use super::timer::SessionTimer;
use super::uploader::{SegmentUploader, UploadLedger};
use crate::backend::ConsultationBackend;
use crate::capture::{self, CaptureConstraints, CaptureDevice};
use crate::config::Config;
use crate::consultation::{AuthContext, ConsultationForm, ConsultationRecord};
use crate::delivery::ArtifactDelivery;
use crate::encoder::{self, EncoderError, EncoderSettings, Segmenter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Events emitted during recording
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Device and encoder are live
    Started { session_id: SessionId },
    /// Elapsed whole seconds, about once per second
    Tick(u64),
    /// A segment left the encoder
    SegmentEmitted { sequence: u64, bytes: usize },
    /// Stop requested
    Stopping,
    /// Artifact delivered and record persisted
    Finalized(ConsultationRecord),
    /// Error occurred
    Error(String),
}

/// Everything owned by the session in progress
struct ActiveSession {
    session: RecordingSession,
    form: ConsultationForm,
    timer: SessionTimer,
    segmenter: Segmenter,
    collector: JoinHandle<Vec<Segment>>,
}

/// Drives recording sessions
pub struct RecordingManager {
    /// Current session status
    status: SessionStatus,

    device: Arc<dyn CaptureDevice>,
    backend: Arc<dyn ConsultationBackend>,
    delivery: Arc<dyn ArtifactDelivery>,
    auth: AuthContext,

    constraints: CaptureConstraints,
    acquire_timeout: Option<Duration>,
    encoder: EncoderSettings,

    active: Option<ActiveSession>,

    /// Most recently ended session
    last_session: Option<RecordingSession>,

    /// Upload outcomes of the current or last session
    ledger: Option<Arc<UploadLedger>>,

    /// Event broadcaster
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl RecordingManager {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        backend: Arc<dyn ConsultationBackend>,
        delivery: Arc<dyn ArtifactDelivery>,
        auth: AuthContext,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            status: SessionStatus::Idle,
            device,
            backend,
            delivery,
            auth,
            constraints: CaptureConstraints::default(),
            acquire_timeout: None,
            encoder: EncoderSettings::default(),
            active: None,
            last_session: None,
            ledger: None,
            event_tx,
        }
    }

    /// Build a manager with the capture and encoder sections of `config`
    pub fn from_config(
        config: &Config,
        device: Arc<dyn CaptureDevice>,
        backend: Arc<dyn ConsultationBackend>,
        delivery: Arc<dyn ArtifactDelivery>,
        auth: AuthContext,
    ) -> Self {
        Self::new(device, backend, delivery, auth)
            .with_constraints(config.capture.constraints.clone())
            .with_acquire_timeout(config.capture.acquire_timeout())
            .with_encoder_settings(config.encoder.clone())
    }

    pub fn with_constraints(mut self, constraints: CaptureConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_encoder_settings(mut self, settings: EncoderSettings) -> Self {
        self.encoder = settings;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Current status; a session whose encoder died reports `Stopping` until
    /// [`stop`](Self::stop) finalizes what was buffered
    pub fn status(&self) -> SessionStatus {
        match &self.active {
            Some(active)
                if self.status == SessionStatus::Recording && active.segmenter.failure().is_some() =>
            {
                SessionStatus::Stopping
            }
            _ => self.status,
        }
    }

    /// Why the current session's encoder stopped early, if it did
    pub fn encoder_failure(&self) -> Option<EncoderError> {
        self.active.as_ref().and_then(|active| active.segmenter.failure())
    }

    /// Snapshot of the current session, or the last one if none is active
    pub fn session(&self) -> Option<RecordingSession> {
        match &self.active {
            Some(active) => {
                let mut session = active.session.clone();
                session.status = self.status();
                session.elapsed_seconds = active.timer.elapsed_seconds();
                Some(session)
            }
            None => self.last_session.clone(),
        }
    }

    /// Elapsed seconds of the current session; frozen once it stops
    pub fn elapsed_seconds(&self) -> u64 {
        match (&self.active, &self.last_session) {
            (Some(active), _) => active.timer.elapsed_seconds(),
            (None, Some(last)) => last.elapsed_seconds,
            (None, None) => 0,
        }
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    pub fn upload_ledger(&self) -> Option<Arc<UploadLedger>> {
        self.ledger.clone()
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    fn fail_start(&mut self, err: RecordingError) -> RecordingError {
        self.set_status(SessionStatus::Idle);
        tracing::warn!("Failed to start recording: {}", err);
        let _ = self.event_tx.send(RecordingEvent::Error(err.to_string()));
        err
    }

    /// Start a new session
    ///
    /// The session only counts as started once the device is held and the
    /// encoder accepted it. Any failure before that leaves nothing held.
    pub async fn start(&mut self, form: ConsultationForm) -> RecordingResult<SessionId> {
        let current_status = self.status();
        if current_status.is_active() || self.active.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        form.validate()?;

        // A finalized or failed session is discarded by starting over
        self.set_status(SessionStatus::Idle);

        tracing::info!(
            device = self.device.name(),
            "Starting recording for UHID {}",
            form.uhid_id
        );

        let acquired =
            capture::acquire(self.device.as_ref(), &self.constraints, self.acquire_timeout).await;
        let handle = match acquired {
            Ok(handle) => handle,
            Err(err) => return Err(self.fail_start(err.into())),
        };

        let mut media_encoder = encoder::for_tracks(&self.encoder, &handle.tracks());
        if let Err(err) = media_encoder.start(&handle) {
            handle.release();
            return Err(self.fail_start(err.into()));
        }

        let session = RecordingSession::new(SessionId::generate());
        let session_id = session.session_id.clone();

        let uploader = SegmentUploader::new(self.backend.clone());
        self.ledger = Some(uploader.ledger());

        let timer = SessionTimer::start(self.event_tx.clone());
        let (segmenter, segments) = Segmenter::spawn(handle, media_encoder, self.encoder.timeslice());
        let collector = tokio::spawn(collect_segments(
            segments,
            segmenter.failures(),
            uploader,
            session_id.clone(),
            self.event_tx.clone(),
        ));

        self.active = Some(ActiveSession {
            session,
            form,
            timer,
            segmenter,
            collector,
        });
        self.set_status(SessionStatus::Recording);
        let _ = self.event_tx.send(RecordingEvent::Started {
            session_id: session_id.clone(),
        });

        tracing::info!(session_id = %session_id, "Recording started");
        Ok(session_id)
    }

    /// Stop the session and run the finalize sequence
    ///
    /// Returns `Ok(None)` when nothing is recording.
    pub async fn stop(&mut self) -> RecordingResult<Option<ConsultationRecord>> {
        if self.status != SessionStatus::Recording {
            tracing::debug!("Stop requested with no recording in progress");
            return Ok(None);
        }
        let Some(active) = self.active.take() else {
            return Ok(None);
        };
        let ActiveSession {
            mut session,
            form,
            mut timer,
            segmenter,
            collector,
        } = active;

        self.set_status(SessionStatus::Stopping);
        let _ = self.event_tx.send(RecordingEvent::Stopping);
        session.status = SessionStatus::Stopping;
        session.elapsed_seconds = timer.stop();

        tracing::info!(
            session_id = %session.session_id,
            "Stopping recording after {}s",
            session.elapsed_seconds
        );

        match segmenter.stop().await {
            Ok(report) => tracing::debug!(
                session_id = %session.session_id,
                "Segment stream completed: {} segments, {} bytes",
                report.segments_emitted,
                report.bytes_emitted
            ),
            Err(err) => tracing::warn!(
                session_id = %session.session_id,
                "Encoder stopped early ({}); finalizing with buffered data",
                err
            ),
        }

        let segments = match collector.await {
            Ok(segments) => segments,
            Err(err) => {
                tracing::error!(session_id = %session.session_id, "Segment collector failed: {}", err);
                Vec::new()
            }
        };

        let finalizer = Finalizer::new(
            self.encoder.container,
            self.delivery.clone(),
            self.backend.clone(),
            self.auth.clone(),
        );
        let result = finalizer.finalize(&session, &segments, &form).await;

        match result {
            Ok(record) => {
                session.status = SessionStatus::Finalized;
                self.last_session = Some(session);
                self.set_status(SessionStatus::Finalized);
                let _ = self.event_tx.send(RecordingEvent::Finalized(record.clone()));
                tracing::info!(
                    video_file_name = record.video_file_name,
                    "Consultation saved. Duration: {}s",
                    record.duration_seconds
                );
                Ok(Some(record))
            }
            Err(err) => {
                session.status = SessionStatus::Failed;
                tracing::error!(session_id = %session.session_id, "Failed to finalize recording: {}", err);
                self.last_session = Some(session);
                self.set_status(SessionStatus::Failed);
                let _ = self.event_tx.send(RecordingEvent::Error(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Abandon the current session without finalizing
    ///
    /// Releases the device and discards buffered segments.
    pub async fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            let ActiveSession {
                mut session,
                mut timer,
                segmenter,
                collector,
                ..
            } = active;
            session.elapsed_seconds = timer.stop();
            session.status = SessionStatus::Idle;
            segmenter.abort().await;
            collector.abort();
            let _ = collector.await;
            tracing::info!(session_id = %session.session_id, "Recording torn down");
            self.last_session = Some(session);
        }
        self.set_status(SessionStatus::Idle);
    }
}

impl Drop for RecordingManager {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            // Dropping the segmenter counts as a stop; its task then releases the device
            active.collector.abort();
            tracing::warn!(
                session_id = %active.session.session_id,
                "Recording manager dropped with a session in progress"
            );
        }
    }
}

/// Buffer segments in emission order, handing each to the uploader as it arrives
///
/// The channel closing without a stop means the encoder failed; that is
/// published as [`RecordingEvent::Error`].
async fn collect_segments(
    mut rx: mpsc::Receiver<Segment>,
    failures: watch::Receiver<Option<EncoderError>>,
    uploader: SegmentUploader,
    session_id: SessionId,
    events: broadcast::Sender<RecordingEvent>,
) -> Vec<Segment> {
    let mut segments = Vec::new();
    while let Some(segment) = rx.recv().await {
        uploader.upload(&session_id, &segment);
        let _ = events.send(RecordingEvent::SegmentEmitted {
            sequence: segment.sequence_index,
            bytes: segment.len(),
        });
        segments.push(segment);
    }

    let failure = failures.borrow().clone();
    if let Some(err) = failure {
        tracing::warn!(
            session_id = %session_id,
            "Recording interrupted after {} segment(s): {}",
            segments.len(),
            err
        );
        let _ = events.send(RecordingEvent::Error(format!("Recording interrupted: {err}")));
    }
    segments
}
