use super::finalizer::FinalizeError;
use crate::capture::DeviceError;
use crate::consultation::FormError;
use crate::encoder::EncoderError;
use thiserror::Error;

/// Recording session errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("{0}")]
    InvalidForm(#[from] FormError),

    #[error("Failed to access camera: {0}")]
    Device(#[from] DeviceError),

    #[error("Failed to start encoder: {0}")]
    Encoder(#[from] EncoderError),

    #[error("{0}")]
    Finalize(#[from] FinalizeError),
}

pub type RecordingResult<T> = Result<T, RecordingError>;
