//! Submission record and its lifecycle states

use super::extraction::{ExtractionResult, ValidationReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reviewer id recorded for decisions taken by the pipeline itself
pub const AUTO_REVIEWER: &str = "auto";

/// Persisted submission status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    AutoApproved,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::AutoApproved => "auto_approved",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SubmissionStatus::Pending),
            "auto_approved" => Some(SubmissionStatus::AutoApproved),
            "approved" => Some(SubmissionStatus::Approved),
            "rejected" => Some(SubmissionStatus::Rejected),
            _ => None,
        }
    }

    /// Everything except `pending` is final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Pending)
    }

    pub fn is_published(&self) -> bool {
        matches!(self, SubmissionStatus::AutoApproved | SubmissionStatus::Approved)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason attached to a rejected submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCode {
    NotADocument,
    WrongCycle,
    WrongMunicipality,
    /// Storage succeeded but a collaborator failed afterwards
    UpstreamUnavailable,
    /// Collaborator answered with something that could not be decoded
    AnalysisFailed,
    ManualReview,
    ExpiredUnreviewed,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::NotADocument => "not_a_document",
            RejectionCode::WrongCycle => "wrong_cycle",
            RejectionCode::WrongMunicipality => "wrong_municipality",
            RejectionCode::UpstreamUnavailable => "upstream_unavailable",
            RejectionCode::AnalysisFailed => "analysis_failed",
            RejectionCode::ManualReview => "manual_review",
            RejectionCode::ExpiredUnreviewed => "expired_unreviewed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_a_document" => Some(RejectionCode::NotADocument),
            "wrong_cycle" => Some(RejectionCode::WrongCycle),
            "wrong_municipality" => Some(RejectionCode::WrongMunicipality),
            "upstream_unavailable" => Some(RejectionCode::UpstreamUnavailable),
            "analysis_failed" => Some(RejectionCode::AnalysisFailed),
            "manual_review" => Some(RejectionCode::ManualReview),
            "expired_unreviewed" => Some(RejectionCode::ExpiredUnreviewed),
            _ => None,
        }
    }

    /// Rows with these codes do not block a retry of the same image
    pub fn releases_fingerprint(&self) -> bool {
        matches!(
            self,
            RejectionCode::UpstreamUnavailable | RejectionCode::AnalysisFailed
        )
    }
}

/// Who submitted, reduced to hashed identity proxies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitterIdentity {
    pub ip_hash: String,
    pub device_hash: Option<String>,
    pub email: Option<String>,
}

/// One intake attempt that passed structural, quota and duplicate checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub municipality_code: String,
    pub municipality_name: String,
    pub submitter: SubmitterIdentity,
    pub image_url: String,
    pub fingerprint: String,
    pub content_hash: String,
    pub raw_extraction: Option<serde_json::Value>,
    pub extracted: Option<ExtractionResult>,
    pub confidence_score: Option<f32>,
    pub status: SubmissionStatus,
    pub rejection_code: Option<RejectionCode>,
    pub rejection_reason: Option<String>,
    pub validation: Option<ValidationReport>,
    pub reviewer_id: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Check the status/rejection/reviewer invariants
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.status.is_published() && self.rejection_reason.is_some() {
            return Err(format!(
                "submission {} is {} but carries a rejection reason",
                self.id, self.status
            ));
        }
        if self.status == SubmissionStatus::Rejected && self.rejection_reason.is_none() {
            return Err(format!("submission {} is rejected without a reason", self.id));
        }
        if self.reviewer_id.is_some() != self.reviewed_at.is_some() {
            return Err(format!(
                "submission {} has reviewer and review timestamp out of step",
                self.id
            ));
        }
        if let Some(score) = self.confidence_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(format!(
                    "submission {} has confidence {} outside 0.0-1.0",
                    self.id, score
                ));
            }
        }
        Ok(())
    }

    /// Mark as rejected by the pipeline itself
    pub fn reject_automatically(&mut self, code: RejectionCode, reason: impl Into<String>, at: DateTime<Utc>) {
        self.status = SubmissionStatus::Rejected;
        self.rejection_code = Some(code);
        self.rejection_reason = Some(reason.into());
        self.reviewer_id = Some(AUTO_REVIEWER.to_string());
        self.reviewed_at = Some(at);
    }
}

/// Audit event names written to `submission_audit`
pub mod audit_event {
    pub const RECEIVED: &str = "received";
    pub const STORED: &str = "stored";
    pub const EXTRACTION_FAILED: &str = "extraction_failed";
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const GATE_REJECTED: &str = "gate_rejected";
    pub const VALIDATED: &str = "validated";
    pub const AUTO_APPROVED: &str = "auto_approved";
    pub const PENDING: &str = "pending";
    pub const CANDIDATES_PUBLISHED: &str = "candidates_published";
    pub const REVIEWED: &str = "reviewed";
    pub const EXPIRED: &str = "expired";
}

/// One row of the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(event: &str, detail: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            event: event.to_string(),
            detail,
            created_at,
        }
    }
}
