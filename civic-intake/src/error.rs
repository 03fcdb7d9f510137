//! Error taxonomy for civic-intake
//!
//! Every collaborator or store failure is translated into one of these kinds
//! before it leaves the orchestrator or the moderation workflow. Raw
//! collaborator messages go to the audit log, never into `user_message()`.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Hard gate that rejected a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionGate {
    NotADocument,
    WrongCycle,
    WrongMunicipality,
}

impl RejectionGate {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionGate::NotADocument => "not a campaign document",
            RejectionGate::WrongCycle => "wrong election cycle",
            RejectionGate::WrongMunicipality => "wrong municipality",
        }
    }
}

impl std::fmt::Display for RejectionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intake and moderation error kinds
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Bad input; retrying the same request cannot succeed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Daily quota exhausted on `axis`; retry after `retry_after`
    #[error("Quota exceeded on {axis}: {count}/{limit}, retry after {retry_after}")]
    QuotaExceeded {
        axis: &'static str,
        count: u32,
        limit: u32,
        retry_after: DateTime<Utc>,
    },

    /// Same (or near-identical) image already submitted
    #[error("Duplicate submission (matches {existing_id:?})")]
    DuplicateSubmission { existing_id: Option<Uuid> },

    /// Transient collaborator failure; any partial audit state was kept
    #[error("Upstream unavailable: {service}")]
    UpstreamUnavailable {
        service: &'static str,
        submission_id: Option<Uuid>,
    },

    /// A hard gate rejected the document; the submission was recorded
    #[error("Content rejected: {gate}")]
    ContentRejected {
        gate: RejectionGate,
        submission_id: Uuid,
    },

    /// Requested submission does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invariant violation; always logged at error level
    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),
}

/// Result type for intake operations
pub type IntakeResult<T> = Result<T, IntakeError>;

impl IntakeError {
    /// Build an [`IntakeError::InternalInconsistency`], logging it at error level
    pub fn inconsistency(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(error = %message, "Internal inconsistency");
        IntakeError::InternalInconsistency(message)
    }

    /// Stable code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            IntakeError::Validation(_) => "VALIDATION_ERROR",
            IntakeError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            IntakeError::DuplicateSubmission { .. } => "DUPLICATE_SUBMISSION",
            IntakeError::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            IntakeError::ContentRejected { .. } => "CONTENT_REJECTED",
            IntakeError::NotFound(_) => "NOT_FOUND",
            IntakeError::InternalInconsistency(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IntakeError::QuotaExceeded { .. } | IntakeError::UpstreamUnavailable { .. }
        )
    }

    /// Message safe to show to an anonymous submitter
    pub fn user_message(&self) -> String {
        match self {
            IntakeError::Validation(msg) => format!("Invalid submission: {}", msg),
            IntakeError::QuotaExceeded { retry_after, .. } => format!(
                "Daily upload limit reached. Please try again after {}.",
                retry_after.format("%Y-%m-%d %H:%M UTC")
            ),
            IntakeError::DuplicateSubmission { .. } => {
                "This document has already been submitted.".to_string()
            }
            IntakeError::UpstreamUnavailable { .. } => {
                "The document could not be analysed right now. Please try again later.".to_string()
            }
            IntakeError::ContentRejected { gate, .. } => match gate {
                RejectionGate::NotADocument => {
                    "The image does not look like a campaign document.".to_string()
                }
                RejectionGate::WrongCycle => {
                    "The document does not mention the upcoming municipal election.".to_string()
                }
                RejectionGate::WrongMunicipality => {
                    "The document concerns a different municipality (wrong municipality).".to_string()
                }
            },
            IntakeError::NotFound(_) => "Submission not found.".to_string(),
            IntakeError::InternalInconsistency(_) => {
                "An internal error occurred. The problem has been logged.".to_string()
            }
        }
    }

    /// Submission recorded for this failure, if any
    pub fn submission_id(&self) -> Option<Uuid> {
        match self {
            IntakeError::UpstreamUnavailable { submission_id, .. } => *submission_id,
            IntakeError::ContentRejected { submission_id, .. } => Some(*submission_id),
            _ => None,
        }
    }

    /// Map a store failure to the taxonomy
    ///
    /// Uniqueness violations on submissions are duplicates; lock contention
    /// and I/O are transient; anything else is an inconsistency.
    pub fn from_store(err: civic_common::Error, submission_id: Option<Uuid>) -> Self {
        if err.is_unique_violation() {
            return IntakeError::DuplicateSubmission { existing_id: None };
        }
        match err {
            civic_common::Error::Database(ref db_err) if is_transient(db_err) => {
                tracing::warn!(error = %err, "Submission store unavailable");
                IntakeError::UpstreamUnavailable {
                    service: "submission store",
                    submission_id,
                }
            }
            civic_common::Error::Io(_) => IntakeError::UpstreamUnavailable {
                service: "submission store",
                submission_id,
            },
            civic_common::Error::NotFound(what) => IntakeError::NotFound(what),
            civic_common::Error::InvalidInput(msg) => IntakeError::Validation(msg),
            other => {
                tracing::error!(error = %other, "Submission store inconsistency");
                IntakeError::InternalInconsistency(other.to_string())
            }
        }
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err.message().contains("locked"),
        _ => false,
    }
}

impl From<civic_common::Error> for IntakeError {
    fn from(err: civic_common::Error) -> Self {
        IntakeError::from_store(err, None)
    }
}
