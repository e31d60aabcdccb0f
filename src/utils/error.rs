//! Error types and handling
//!
//! Top-level error used by the binary, and the JSON shape it is reported in.

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::recorder::{FinalizeError, RecordingError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Recording(#[from] RecordingError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Error response printed for callers
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Recording(err) => match err {
                RecordingError::AlreadyRecording => "ALREADY_RECORDING",
                RecordingError::InvalidForm(_) => "INVALID_FORM",
                RecordingError::Device(_) => "DEVICE_ERROR",
                RecordingError::Encoder(_) => "ENCODER_ERROR",
                RecordingError::Finalize(FinalizeError::NoData) => "NO_DATA",
                RecordingError::Finalize(FinalizeError::Persist { .. }) => "PERSIST_ERROR",
                RecordingError::Finalize(_) => "FINALIZE_ERROR",
            },
            AppError::Backend(_) => "BACKEND_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consultation::FormError;

    #[test]
    fn test_form_error_keeps_user_message() {
        let err = AppError::from(RecordingError::from(FormError::MissingFields(vec![
            "patientName",
            "uhidId",
        ])));
        let response = ErrorResponse::from(err);
        assert_eq!(response.code, "INVALID_FORM");
        assert_eq!(
            response.message,
            "Please fill in all required fields: patientName, uhidId"
        );
    }

    #[test]
    fn test_persist_failure_code() {
        let err = AppError::from(RecordingError::from(FinalizeError::Persist {
            message: "Unknown error".into(),
        }));
        let response = ErrorResponse::from(err);
        assert_eq!(response.code, "PERSIST_ERROR");
        assert_eq!(response.message, "Unknown error");
    }
}
