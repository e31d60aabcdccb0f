//! Fixed-cadence segmenter
//!
//! Runs the encoder on its own task, flushing it every timeslice into a bounded
//! channel of [`Segment`]s. The task owns the capture handle: it releases the
//! device after the final flush, on encoder failure, or when the task is
//! aborted and its future dropped. An encoder failure is also published on a
//! watch channel so the owner learns about it before asking for a stop.

use super::{EncoderError, MediaEncoder};
use crate::capture::CaptureHandle;
use crate::recorder::state::Segment;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Segments buffered between the segmenter and its consumer
const CHANNEL_CAPACITY: usize = 64;

/// Summary returned once the segment stream has completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmenterReport {
    pub segments_emitted: u64,
    pub bytes_emitted: u64,
}

/// Handle to a running segmenter task
pub struct Segmenter {
    stop_tx: Option<oneshot::Sender<()>>,
    failure_rx: watch::Receiver<Option<EncoderError>>,
    task: JoinHandle<Result<SegmenterReport, EncoderError>>,
}

impl Segmenter {
    /// Spawn the segmenter; the returned receiver yields segments in emission order
    /// and closes once the stop flush has been emitted.
    pub fn spawn(
        handle: CaptureHandle,
        encoder: Box<dyn MediaEncoder>,
        timeslice: Duration,
    ) -> (Self, mpsc::Receiver<Segment>) {
        let (segment_tx, segment_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        let (failure_tx, failure_rx) = watch::channel(None);
        let task = tokio::spawn(run(handle, encoder, timeslice, segment_tx, stop_rx, failure_tx));
        (
            Self {
                stop_tx: Some(stop_tx),
                failure_rx,
                task,
            },
            segment_rx,
        )
    }

    /// The error that ended the stream early, if any
    pub fn failure(&self) -> Option<EncoderError> {
        self.failure_rx.borrow().clone()
    }

    /// Watch for an early encoder failure; set before the segment channel closes
    pub fn failures(&self) -> watch::Receiver<Option<EncoderError>> {
        self.failure_rx.clone()
    }

    /// Request the final flush and wait for the stream to complete
    pub async fn stop(mut self) -> Result<SegmenterReport, EncoderError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(EncoderError::Aborted(e.to_string())),
        }
    }

    /// Cancel the task without a final flush; the device is released when the
    /// task's future is dropped.
    pub async fn abort(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

struct Emitter {
    tx: mpsc::Sender<Segment>,
    next_index: u64,
    bytes: u64,
}

impl Emitter {
    async fn emit(&mut self, payload: Vec<u8>, is_final: bool) {
        let segment = Segment::new(self.next_index, Bytes::from(payload), is_final);
        self.next_index += 1;
        self.bytes += segment.len() as u64;
        tracing::debug!(
            sequence = segment.sequence_index,
            bytes = segment.len(),
            is_final,
            "Segment emitted"
        );
        // A closed receiver means the session is being torn down
        let _ = self.tx.send(segment).await;
    }

    fn report(&self) -> SegmenterReport {
        SegmenterReport {
            segments_emitted: self.next_index,
            bytes_emitted: self.bytes,
        }
    }
}

async fn run(
    mut handle: CaptureHandle,
    mut encoder: Box<dyn MediaEncoder>,
    timeslice: Duration,
    tx: mpsc::Sender<Segment>,
    mut stop_rx: oneshot::Receiver<()>,
    failure_tx: watch::Sender<Option<EncoderError>>,
) -> Result<SegmenterReport, EncoderError> {
    let mut emitter = Emitter {
        tx,
        next_index: 0,
        bytes: 0,
    };
    let mut ticker = tokio::time::interval_at(Instant::now() + timeslice, timeslice);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let streamed = loop {
        tokio::select! {
            biased;
            // Dropping the sender counts as a stop request too
            _ = &mut stop_rx => break Ok(()),
            _ = ticker.tick() => match encoder.encode(&mut handle) {
                Ok(payload) if payload.is_empty() => {}
                Ok(payload) => emitter.emit(payload, false).await,
                Err(e) => break Err(e),
            },
        }
    };

    let result = match streamed.and_then(|()| encoder.finish(&mut handle)) {
        Ok(tail) => {
            emitter.emit(tail, true).await;
            Ok(emitter.report())
        }
        Err(e) => {
            tracing::error!("Encoder failed after {} segment(s): {}", emitter.next_index, e);
            failure_tx.send_replace(Some(e.clone()));
            Err(e)
        }
    };

    handle.release();
    result
}
