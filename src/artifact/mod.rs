//! Recording artifact assembly
//!
//! This module turns the buffered segments of a session into the single
//! downloadable file, and corrects its container duration metadata.

pub mod ebml;
pub mod webm;

use crate::consultation::ConsultationForm;
use crate::recorder::state::Segment;
use serde::{Deserialize, Serialize};

pub use webm::DurationFixError;

/// Container the encoder writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    #[default]
    Webm,
}

impl ContainerFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Webm => "webm",
        }
    }

    /// Full MIME type including codecs, as negotiated with the encoder
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerFormat::Webm => "video/webm;codecs=vp9,opus",
        }
    }

    /// Content type for uploaded segments
    pub fn content_type(&self) -> &'static str {
        match self {
            ContainerFormat::Webm => "video/webm",
        }
    }
}

/// Concatenate segment payloads in the order given
pub fn assemble(segments: &[Segment]) -> Vec<u8> {
    let total: usize = segments.iter().map(|s| s.len()).sum();
    let mut artifact = Vec::with_capacity(total);
    for segment in segments {
        artifact.extend_from_slice(&segment.payload);
    }
    artifact
}

/// Overwrite the provisional container duration with `elapsed_seconds`
pub fn correct_duration(
    container: ContainerFormat,
    artifact: &[u8],
    elapsed_seconds: u64,
) -> Result<Vec<u8>, DurationFixError> {
    match container {
        ContainerFormat::Webm => webm::fix_duration(artifact, elapsed_seconds as f64),
    }
}

/// `{uhidId}_{patientName}.{extension}`
pub fn file_name(form: &ConsultationForm, container: ContainerFormat) -> String {
    format!(
        "{}_{}.{}",
        form.uhid_id,
        form.patient_name,
        container.extension()
    )
}
