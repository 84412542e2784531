//! Scan submission boundary: the request the station sends and the subject
//! record the backend answers with.

pub mod http;

pub use http::HttpSubmissionApi;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scan::{Reason, ScanMode};

pub const DEFAULT_FAILURE_MESSAGE: &str = "Scan failed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanMetadata {
    pub reason: Reason,
    pub approved_by: Option<String>,
    pub plate_number: Option<String>,
}

impl ScanMetadata {
    /// Metadata sent when the station submits without a confirmation step.
    pub fn attendance() -> Self {
        Self {
            reason: Reason::Attendance,
            approved_by: None,
            plate_number: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub code: String,
    pub mode: ScanMode,
    pub metadata: ScanMetadata,
}

/// The person a scanned code resolved to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub name: String,
    pub role: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub code: String,
    pub subject: Subject,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Network(String),
}

impl SubmissionError {
    pub fn message(&self) -> &str {
        match self {
            SubmissionError::Unauthorized(message)
            | SubmissionError::Validation(message)
            | SubmissionError::NotFound(message)
            | SubmissionError::Network(message) => message,
        }
    }
}

#[async_trait]
pub trait SubmissionApi: Send + Sync {
    async fn submit(&self, request: ScanRequest) -> Result<ScanResult, SubmissionError>;
}
