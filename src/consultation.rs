//! Consultation form and record types
//!
//! The form is what the clinician fills in before recording; the record is what
//! gets persisted once a session finalizes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Form validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("Please fill in all required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
}

/// Identity and participant fields captured before recording starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationForm {
    pub patient_name: String,
    pub uhid_id: String,
    pub attender_name: String,
    pub icu_consultant_name: String,
    pub doctor_name: String,
}

impl ConsultationForm {
    /// Names of the required fields that are blank, in form order
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("patientName", &self.patient_name),
            ("uhidId", &self.uhid_id),
            ("attenderName", &self.attender_name),
            ("icuConsultantName", &self.icu_consultant_name),
            ("doctorName", &self.doctor_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn validate(&self) -> Result<(), FormError> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FormError::MissingFields(missing))
        }
    }
}

/// Role of the signed-in user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Admin,
}

/// Authenticated user on whose behalf consultations are recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub user_id: String,
    pub token: String,
    pub role: Role,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Record status; only completed consultations are ever persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Completed,
}

/// Metadata record persisted after a successful finalize
///
/// Serializes to the exact body of `POST /consultations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationRecord {
    pub patient_name: String,
    pub uhid_id: String,
    /// Id of the authenticated user
    pub doctor: String,
    pub doctor_name: String,
    pub attender_name: String,
    pub icu_consultant_name: String,
    /// Finalize time, not start time
    #[serde(serialize_with = "iso_millis")]
    pub date: DateTime<Utc>,
    #[serde(rename = "recordingDuration")]
    pub duration_seconds: u64,
    pub status: RecordStatus,
    pub video_file_name: String,
}

impl ConsultationRecord {
    pub fn completed(
        form: &ConsultationForm,
        auth: &AuthContext,
        duration_seconds: u64,
        video_file_name: String,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            patient_name: form.patient_name.clone(),
            uhid_id: form.uhid_id.clone(),
            doctor: auth.user_id.clone(),
            doctor_name: form.doctor_name.clone(),
            attender_name: form.attender_name.clone(),
            icu_consultant_name: form.icu_consultant_name.clone(),
            date,
            duration_seconds,
            status: RecordStatus::Completed,
            video_file_name,
        }
    }
}

fn iso_millis<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&date.to_rfc3339_opts(SecondsFormat::Millis, true))
}
