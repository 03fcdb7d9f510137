//! Data models for the intake pipeline

pub mod candidate;
pub mod extraction;
pub mod submission;

pub use candidate::{CandidateRecord, Provenance};
pub use extraction::{
    ContactInfo, CriteriaBreakdown, CriterionScore, ExtractedCandidate, ExtractionOutcome,
    ExtractionOverrides, ExtractionResponse, ExtractionResult, ExtractionSummary, ValidationReport,
};
pub use submission::{
    audit_event, AuditEntry, RejectionCode, Submission, SubmissionStatus, SubmitterIdentity, AUTO_REVIEWER,
};
