//! Moderation workflow
//!
//! Human decisions on `pending` submissions, plus the expiry sweep for
//! submissions nobody reviewed. Every decision is a conditional update
//! (`WHERE status = 'pending'`), so deciding an already-final submission
//! returns its current state and writes nothing.

use crate::config::IntakeConfig;
use crate::db;
use crate::error::{IntakeError, IntakeResult};
use crate::models::{
    audit_event, AuditEntry, CandidateRecord, ExtractionOverrides, ExtractionResult, Provenance,
    RejectionCode, Submission, SubmissionStatus,
};
use crate::utils::retry_on_lock;
use chrono::{DateTime, Duration, Utc};
use civic_common::time::Clock;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Reason stored when a moderator rejects without giving one
pub const DEFAULT_REJECTION_REASON: &str = "Rejected by moderator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl ReviewAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "approve" => Some(ReviewAction::Approve),
            "reject" => Some(ReviewAction::Reject),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
        }
    }
}

pub struct ModerationWorkflow {
    pool: SqlitePool,
    pending_retention_days: i64,
    max_lock_wait_ms: u64,
    clock: Arc<dyn Clock>,
}

impl ModerationWorkflow {
    pub fn new(pool: SqlitePool, config: &IntakeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            pending_retention_days: config.intake.pending_retention_days,
            max_lock_wait_ms: config.database.max_lock_wait_ms,
            clock,
        }
    }

    /// Pending submissions, oldest first
    pub async fn list_pending(
        &self,
        municipality_code: Option<&str>,
        limit: u32,
    ) -> IntakeResult<Vec<Submission>> {
        let code = municipality_code.map(str::trim).filter(|c| !c.is_empty());
        Ok(db::submissions::list_pending(&self.pool, code, limit).await?)
    }

    pub async fn audit_trail(&self, submission_id: Uuid) -> IntakeResult<Vec<AuditEntry>> {
        Ok(db::submissions::load_audit_trail(&self.pool, submission_id).await?)
    }

    /// Final human decision on a submission
    ///
    /// Approval merges `overrides` over the extracted fields and upserts the
    /// candidates with manual provenance. Rejection stores `reason` (or a
    /// generic one) and writes no candidates.
    pub async fn review(
        &self,
        submission_id: Uuid,
        action: ReviewAction,
        overrides: Option<ExtractionOverrides>,
        reason: Option<String>,
        reviewer: &str,
    ) -> IntakeResult<Submission> {
        let reviewer = reviewer.trim();
        if reviewer.is_empty() {
            return Err(IntakeError::Validation("reviewer id is required".to_string()));
        }

        let current = self.load(submission_id).await?;
        if current.status.is_terminal() {
            tracing::info!(
                submission_id = %submission_id,
                status = %current.status,
                action = action.as_str(),
                "Submission already decided, review ignored"
            );
            return Ok(current);
        }

        let now = self.clock.now();
        let mut decided = current.clone();
        decided.reviewer_id = Some(reviewer.to_string());
        decided.reviewed_at = Some(now);

        let mut audit = Vec::new();
        let candidates = match action {
            ReviewAction::Approve => {
                let extraction = match (&current.extracted, &overrides) {
                    (Some(original), Some(overrides)) => Some(original.merged_with(overrides)),
                    (None, Some(overrides)) => Some(ExtractionResult::default().merged_with(overrides)),
                    (original, None) => original.clone(),
                };
                decided.status = SubmissionStatus::Approved;
                decided.rejection_code = None;
                decided.rejection_reason = None;
                decided.extracted = extraction;

                audit.push(AuditEntry::new(
                    audit_event::REVIEWED,
                    Some(format!(
                        "approved by {}{}",
                        reviewer,
                        if overrides.is_some() { " with corrections" } else { "" }
                    )),
                    now,
                ));

                let records = decided
                    .extracted
                    .as_ref()
                    .map(|extraction| {
                        CandidateRecord::all_from_extraction(
                            &decided.municipality_code,
                            extraction,
                            Provenance::FlyerManual,
                            submission_id,
                            now,
                        )
                    })
                    .unwrap_or_default();
                audit.push(AuditEntry::new(
                    audit_event::CANDIDATES_PUBLISHED,
                    Some(format!("{} candidate record(s)", records.len())),
                    now,
                ));
                records
            }
            ReviewAction::Reject => {
                let reason = reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .unwrap_or(DEFAULT_REJECTION_REASON)
                    .to_string();
                decided.status = SubmissionStatus::Rejected;
                decided.rejection_code = Some(RejectionCode::ManualReview);
                decided.rejection_reason = Some(reason.clone());

                audit.push(AuditEntry::new(
                    audit_event::REVIEWED,
                    Some(format!("rejected by {}: {}", reviewer, reason)),
                    now,
                ));
                Vec::new()
            }
        };

        decided.check_invariants().map_err(IntakeError::inconsistency)?;

        let applied = retry_on_lock("moderation decision", self.max_lock_wait_ms, || {
            apply_decision(&self.pool, &decided, &audit, &candidates)
        })
        .await
        .map_err(|e| IntakeError::from_store(e, Some(submission_id)))?;

        if !applied {
            // Another reviewer got there first
            tracing::info!(submission_id = %submission_id, "Concurrent decision won, returning stored state");
            return self.load(submission_id).await;
        }

        tracing::info!(
            submission_id = %submission_id,
            status = %decided.status,
            reviewer,
            candidates = candidates.len(),
            "Submission reviewed"
        );
        Ok(decided)
    }

    /// Reject pending submissions older than the retention period
    ///
    /// Returns the ids that were expired.
    pub async fn expire_stale_pending(&self, now: DateTime<Utc>) -> IntakeResult<Vec<Uuid>> {
        let cutoff = now - Duration::days(self.pending_retention_days);
        let stale = db::submissions::stale_pending_ids(&self.pool, cutoff).await?;
        let reason = format!("Not reviewed within {} days", self.pending_retention_days);

        let mut expired = Vec::with_capacity(stale.len());
        for submission_id in stale {
            let mut submission = self.load(submission_id).await?;
            submission.reject_automatically(RejectionCode::ExpiredUnreviewed, reason.clone(), now);
            let audit = [AuditEntry::new(audit_event::EXPIRED, Some(reason.clone()), now)];

            let applied = retry_on_lock("pending expiry", self.max_lock_wait_ms, || {
                apply_decision(&self.pool, &submission, &audit, &[])
            })
            .await
            .map_err(|e| IntakeError::from_store(e, Some(submission_id)))?;

            if applied {
                expired.push(submission_id);
            }
        }

        tracing::info!(expired = expired.len(), cutoff = %cutoff, "Expired unreviewed submissions");
        Ok(expired)
    }

    async fn load(&self, submission_id: Uuid) -> IntakeResult<Submission> {
        db::submissions::load_submission(&self.pool, submission_id)
            .await?
            .ok_or_else(|| IntakeError::NotFound(format!("submission {}", submission_id)))
    }
}

/// Move a pending submission to its decided state in one transaction
///
/// Returns false (and writes nothing) if the row was no longer pending.
async fn apply_decision(
    pool: &SqlitePool,
    decided: &Submission,
    audit: &[AuditEntry],
    candidates: &[CandidateRecord],
) -> civic_common::Result<bool> {
    let mut tx = pool.begin().await?;
    if !db::submissions::update_decision(&mut tx, decided, SubmissionStatus::Pending).await? {
        tx.rollback().await?;
        return Ok(false);
    }
    for entry in audit {
        db::submissions::insert_audit(&mut tx, decided.id, entry).await?;
    }
    for record in candidates {
        db::candidates::upsert_candidate(&mut tx, record).await?;
    }
    tx.commit().await?;
    Ok(true)
}
