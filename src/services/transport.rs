//! Network contracts the engine consumes: upload one photo, submit one survey.

use crate::models::{FormData, GeoPoint};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use uuid::Uuid;

/// Whether a failure is worth retrying automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network unreachable, timeout, server 5xx
    Transient,
    /// The server rejected the payload
    Permanent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            FailureKind::Transient => write!(f, "Transient failure: {}", self.message),
            FailureKind::Permanent => write!(f, "Rejected: {}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Server-assigned reference of an uploaded photo
pub type RemoteRef = String;

/// One photo upload with its display metadata
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoUpload {
    pub survey_id: Uuid,
    pub photo_id: Uuid,
    pub bytes: Vec<u8>,
    pub caption: Option<String>,
    pub location: Option<String>,
    pub geo: Option<GeoPoint>,
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPhoto {
    pub photo_id: Uuid,
    pub remote_ref: RemoteRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoPoint>,
}

/// A completed survey ready for the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveySubmission {
    pub survey_id: Uuid,
    pub form_data: FormData,
    pub photos: Vec<UploadedPhoto>,
    pub submitted_at: DateTime<Utc>,
}

/// The surrounding system's upload/submit endpoints
pub trait SyncTransport: Send + Sync + 'static {
    fn upload_photo(
        &self,
        upload: PhotoUpload,
    ) -> impl Future<Output = Result<RemoteRef, TransportError>> + Send;

    fn submit_survey(
        &self,
        submission: SurveySubmission,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
