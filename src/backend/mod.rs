//! Backend collaborator
//!
//! The REST service that accumulates uploaded segments and stores consultation
//! records. The recorder only depends on the traits here; `HttpBackend` is the
//! production implementation.

pub mod http;

use crate::consultation::{AuthContext, ConsultationRecord};
use crate::recorder::state::{Segment, SessionId};
use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpBackend;

/// Fallback shown when neither the backend nor the transport say anything useful
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Backend call errors
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("Request failed with status code {status}")]
    Rejected {
        status: u16,
        /// `message` field of the response body, when present
        message: Option<String>,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl BackendError {
    /// Message to surface to the user: the backend's own message if it sent one,
    /// otherwise the error text, otherwise a generic fallback.
    pub fn user_message(&self) -> String {
        let message = match self {
            BackendError::Rejected {
                message: Some(message),
                ..
            } => message.trim().to_string(),
            other => other.to_string(),
        };
        if message.is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            message
        }
    }
}

/// Segment and record endpoints consumed by the recording core
#[async_trait]
pub trait ConsultationBackend: Send + Sync {
    /// `POST /upload-chunk`
    async fn upload_chunk(&self, session_id: &SessionId, segment: &Segment) -> Result<(), BackendError>;

    /// `POST /consultations`, authenticated with the bearer token
    async fn create_consultation(&self, record: &ConsultationRecord, token: &str) -> Result<(), BackendError>;
}

/// Storage location settings, outside the recording state machine
#[async_trait]
pub trait StorageSettings: Send + Sync {
    /// `GET /get-storage-path`
    async fn storage_path(&self) -> Result<Option<String>, BackendError>;

    /// `POST /update-storage-path`; admins only
    async fn update_storage_path(&self, auth: &AuthContext, path: &str) -> Result<bool, BackendError>;
}
