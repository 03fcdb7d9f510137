//! Intake orchestrator
//!
//! Runs one flyer submission to completion:
//!
//! ```text
//! received ─┬─ invalid format ─────────────────────────────► error, nothing stored
//!           ├─ quota exceeded ─────────────────────────────► error, nothing stored
//!           ├─ duplicate ──────────────────────────────────► error, nothing stored
//!           └─ stored ─► extracting ─┬─ not a document ────► rejected (auto)
//!                                    ├─ wrong cycle ───────► rejected (auto)
//!                                    ├─ wrong municipality ► rejected (auto)
//!                                    └─ validating ─┬──────► auto_approved (+ candidates)
//!                                                   └──────► pending
//! ```
//!
//! Steps are strictly sequential. The submission row, its audit trail and any
//! candidate upserts are written in one transaction at the end, so an attempt
//! is either fully recorded or not recorded at all. Collaborator failures
//! after the image is stored are recorded as `rejected` with code
//! `upstream_unavailable` (or `analysis_failed` for undecodable responses);
//! those rows do not block a retry of the same image.

use crate::collaborators::{
    CollaboratorError, ExtractionService, Municipality, MunicipalityDirectory, ObjectStorage,
    StorageError, ValidationService,
};
use crate::config::IntakeConfig;
use crate::db;
use crate::error::{IntakeError, IntakeResult, RejectionGate};
use crate::models::extraction::clamp_unit;
use crate::models::{
    audit_event, AuditEntry, CandidateRecord, ExtractionOutcome, ExtractionResult,
    ExtractionSummary, Provenance, RejectionCode, Submission, SubmissionStatus, SubmitterIdentity,
    ValidationReport, AUTO_REVIEWER,
};
use crate::services::fingerprinter::{Fingerprint, Fingerprinter, ImageFingerprint};
use crate::services::municipality_match::{self, MunicipalityMatch};
use crate::services::rate_limiter::{ActionType, Identifier, RateLimiter};
use crate::utils::retry_on_lock;
use chrono::{DateTime, Utc};
use civic_common::identity::hash_identifier;
use civic_common::time::Clock;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// One submission attempt as received from the caller
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub image: Vec<u8>,
    pub municipality_code: String,
    /// Raw client address; hashed before use
    pub submitter_ip: String,
    /// Raw device fingerprint; hashed before use
    pub device_fingerprint: Option<String>,
    pub submitter_email: Option<String>,
}

impl SubmissionRequest {
    pub fn new(image: Vec<u8>, municipality_code: impl Into<String>, submitter_ip: impl Into<String>) -> Self {
        Self {
            image,
            municipality_code: municipality_code.into(),
            submitter_ip: submitter_ip.into(),
            device_fingerprint: None,
            submitter_email: None,
        }
    }

    pub fn with_device(mut self, device_fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(device_fingerprint.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.submitter_email = Some(email.into());
        self
    }
}

/// Successful intake: the submission was published or queued for review
#[derive(Debug, Clone, Serialize)]
pub struct IntakeOutcome {
    pub submission_id: Uuid,
    /// `auto_approved` or `pending`
    pub status: SubmissionStatus,
    pub confidence_score: f32,
    pub extracted_summary: ExtractionSummary,
    pub candidates_published: usize,
}

/// Caller-facing response shape for both outcomes and errors
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitResponse {
    /// `auto_approved`, `pending` or `rejected`
    pub status: String,
    pub submission_id: Option<Uuid>,
    pub confidence_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_summary: Option<ExtractionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
}

impl SubmitResponse {
    pub fn from_result(result: &IntakeResult<IntakeOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                status: outcome.status.as_str().to_string(),
                submission_id: Some(outcome.submission_id),
                confidence_score: Some(outcome.confidence_score),
                extracted_summary: Some(outcome.extracted_summary.clone()),
                error_code: None,
                message: None,
                retry_after: None,
            },
            Err(err) => Self {
                status: SubmissionStatus::Rejected.as_str().to_string(),
                submission_id: err.submission_id(),
                confidence_score: None,
                extracted_summary: None,
                error_code: Some(err.error_code().to_string()),
                message: Some(err.user_message()),
                retry_after: match err {
                    IntakeError::QuotaExceeded { retry_after, .. } => Some(*retry_after),
                    _ => None,
                },
            },
        }
    }
}

/// External collaborators injected into the orchestrator
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn ObjectStorage>,
    pub extraction: Arc<dyn ExtractionService>,
    pub validation: Arc<dyn ValidationService>,
    pub directory: Arc<dyn MunicipalityDirectory>,
}

/// Submission being assembled, with the audit events gathered so far
struct Draft {
    submission: Submission,
    /// Storage key of the raw image
    object_key: String,
    audit: Vec<AuditEntry>,
}

impl Draft {
    fn record(&mut self, event: &str, detail: Option<String>, at: DateTime<Utc>) {
        self.audit.push(AuditEntry::new(event, detail, at));
    }
}

pub struct IntakeOrchestrator {
    pool: SqlitePool,
    config: IntakeConfig,
    rate_limiter: RateLimiter,
    fingerprinter: Fingerprinter,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
}

impl IntakeOrchestrator {
    pub fn new(
        pool: SqlitePool,
        config: IntakeConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(pool.clone(), config.quotas.clone(), clock.clone())
            .with_max_lock_wait(config.database.max_lock_wait_ms);
        let fingerprinter = Fingerprinter::new(config.intake.hamming_threshold);
        Self {
            pool,
            config,
            rate_limiter,
            fingerprinter,
            collaborators,
            clock,
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Process one submission
    ///
    /// Terminates in exactly one of: `Ok` (auto_approved or pending), or an
    /// error; hard-gate and post-storage failures are recorded before the
    /// error is returned.
    pub async fn submit(&self, request: SubmissionRequest) -> IntakeResult<IntakeOutcome> {
        let received_at = self.clock.now();

        // Step 1: structural validation, before any quota is consumed
        let image_kind = self.validate_structure(&request)?;
        let municipality = self.resolve_municipality(&request.municipality_code).await?;
        let submitter = self.submitter_identity(&request)?;

        // Step 2: quotas on every applicable axis
        let mut identifiers = vec![Identifier::ip(submitter.ip_hash.clone())];
        if let Some(device_hash) = &submitter.device_hash {
            identifiers.push(Identifier::device(device_hash.clone()));
        }
        identifiers.push(Identifier::municipality(municipality.code.clone()));
        self.rate_limiter
            .enforce(ActionType::DocumentUpload, &identifiers)
            .await?;

        // Step 3: fingerprint and duplicate pre-check
        let image: Arc<[u8]> = request.image.into();
        let fingerprint = self.compute_fingerprint(image.clone()).await?;
        self.check_duplicate(&fingerprint).await?;

        // Step 4: persist the raw image
        let submission_id = Uuid::new_v4();
        let key = format!(
            "{}/{}/{}.{}",
            municipality.code,
            received_at.format("%Y/%m"),
            submission_id,
            image_kind.extension()
        );
        let image_url = self
            .collaborators
            .storage
            .put(&key, &image, image_kind.mime_type())
            .await
            .map_err(|e| match e {
                StorageError::AlreadyExists(existing) => {
                    tracing::error!(key = %key, existing = %existing, "Fresh object key already taken");
                    IntakeError::inconsistency(format!("Fresh object key already taken: {}", existing))
                }
                StorageError::Failed(msg) => {
                    tracing::warn!(error = %msg, "Object storage failed");
                    IntakeError::UpstreamUnavailable {
                        service: "object storage",
                        submission_id: None,
                    }
                }
            })?;

        let mut draft = Draft {
            submission: Submission {
                id: submission_id,
                municipality_code: municipality.code.clone(),
                municipality_name: municipality.name.clone(),
                submitter,
                image_url,
                fingerprint: fingerprint.fingerprint.to_storage_string(),
                content_hash: fingerprint.content_hash.clone(),
                raw_extraction: None,
                extracted: None,
                confidence_score: None,
                status: SubmissionStatus::Pending,
                rejection_code: None,
                rejection_reason: None,
                validation: None,
                reviewer_id: None,
                reviewed_at: None,
                created_at: received_at,
            },
            object_key: key.clone(),
            audit: Vec::new(),
        };
        draft.record(
            audit_event::RECEIVED,
            Some(format!(
                "{} bytes ({}) for {}",
                image.len(),
                image_kind.mime_type(),
                municipality.code
            )),
            received_at,
        );
        draft.record(audit_event::STORED, Some(key), self.clock.now());

        tracing::info!(
            submission_id = %submission_id,
            municipality = %municipality.code,
            fingerprint = %draft.submission.fingerprint,
            "Flyer stored, requesting extraction"
        );

        // Step 5: extraction
        let extraction = match self
            .collaborators
            .extraction
            .analyze(&image, &municipality.name, &municipality.code)
            .await
        {
            Ok(response) => {
                draft.submission.raw_extraction = Some(response.raw);
                response.outcome
            }
            Err(e) => return Err(self.record_collaborator_failure(draft, "extraction", e).await),
        };

        // Step 6: hard gates
        let extraction = match extraction {
            ExtractionOutcome::NotADocument { reason } => {
                return Err(self
                    .reject_at_gate(draft, RejectionGate::NotADocument, None, reason)
                    .await);
            }
            ExtractionOutcome::Document(result) => result,
        };
        if let Some((gate, note)) = hard_gate(&municipality, &extraction) {
            return Err(self.reject_at_gate(draft, gate, Some(extraction), Some(note)).await);
        }
        draft.submission.extracted = Some(extraction.clone());

        // Step 7: secondary validation
        let report = match self
            .collaborators
            .validation
            .validate(
                &municipality.name,
                &extraction,
                municipality.department_code.as_deref(),
            )
            .await
        {
            Ok(report) => report,
            Err(e) => return Err(self.record_collaborator_failure(draft, "validation", e).await),
        };
        let report = sanitize_report(submission_id, report);
        draft.record(
            audit_event::VALIDATED,
            Some(format!(
                "confidence {:.3}, valid {}, needs review {}",
                report.confidence_score, report.is_valid, report.needs_human_review
            )),
            self.clock.now(),
        );

        // Step 8: decision
        self.decide(draft, extraction, report).await
    }

    fn validate_structure(&self, request: &SubmissionRequest) -> IntakeResult<infer::Type> {
        if request.image.is_empty() {
            return Err(IntakeError::Validation("image is empty".to_string()));
        }
        let max = self.config.intake.max_image_bytes;
        if request.image.len() > max {
            return Err(IntakeError::Validation(format!(
                "image is {} bytes, the limit is {} bytes",
                request.image.len(),
                max
            )));
        }
        if request.municipality_code.trim().is_empty() {
            return Err(IntakeError::Validation("municipality code is required".to_string()));
        }
        infer::get(&request.image)
            .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
            .ok_or_else(|| IntakeError::Validation("file is not a supported image".to_string()))
    }

    async fn resolve_municipality(&self, code: &str) -> IntakeResult<Municipality> {
        self.collaborators
            .directory
            .lookup(code.trim())
            .await
            .ok_or_else(|| IntakeError::Validation(format!("unknown municipality code '{}'", code.trim())))
    }

    fn submitter_identity(&self, request: &SubmissionRequest) -> IntakeResult<SubmitterIdentity> {
        let salt = &self.config.intake.identifier_salt;
        if request.submitter_ip.trim().is_empty() {
            return Err(IntakeError::Validation("submitter address is required".to_string()));
        }
        let email = request
            .submitter_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| {
                if e.contains('@') && !e.starts_with('@') && !e.ends_with('@') {
                    Ok(e.to_string())
                } else {
                    Err(IntakeError::Validation("email address is malformed".to_string()))
                }
            })
            .transpose()?;

        Ok(SubmitterIdentity {
            ip_hash: hash_identifier(salt, &request.submitter_ip),
            device_hash: request
                .device_fingerprint
                .as_deref()
                .filter(|d| !d.trim().is_empty())
                .map(|d| hash_identifier(salt, d)),
            email,
        })
    }

    async fn compute_fingerprint(&self, image: Arc<[u8]>) -> IntakeResult<ImageFingerprint> {
        let engine = self.fingerprinter;
        tokio::task::spawn_blocking(move || engine.fingerprint(&image))
            .await
            .map_err(|e| IntakeError::inconsistency(format!("Fingerprint task failed: {}", e)))
    }

    /// Advisory duplicate check; the unique index settles races at commit
    async fn check_duplicate(&self, image: &ImageFingerprint) -> IntakeResult<()> {
        let stored = image.fingerprint.to_storage_string();
        if let Some(existing) = db::submissions::find_exact_duplicate(&self.pool, &image.content_hash, &stored)
            .await
            .map_err(|e| IntakeError::from_store(e, None))?
        {
            tracing::info!(existing = %existing, "Exact duplicate rejected");
            return Err(IntakeError::DuplicateSubmission {
                existing_id: Some(existing),
            });
        }

        if let Fingerprint::Perceptual(_) = image.fingerprint {
            let candidates = db::submissions::perceptual_fingerprints(&self.pool)
                .await
                .map_err(|e| IntakeError::from_store(e, None))?;
            for (existing, value) in candidates {
                let Some(other) = Fingerprint::parse(&value) else {
                    continue;
                };
                if self.fingerprinter.is_same_document(&image.fingerprint, &other) {
                    tracing::info!(
                        existing = %existing,
                        distance = image.fingerprint.hamming_distance(&other).unwrap_or(0),
                        "Near-duplicate rejected"
                    );
                    return Err(IntakeError::DuplicateSubmission {
                        existing_id: Some(existing),
                    });
                }
            }
        }

        Ok(())
    }

    async fn decide(
        &self,
        mut draft: Draft,
        extraction: ExtractionResult,
        report: ValidationReport,
    ) -> IntakeResult<IntakeOutcome> {
        let now = self.clock.now();
        let threshold = self.config.intake.auto_approve_threshold;
        let auto_approve = report.is_valid && report.confidence_score >= threshold;
        let submission_id = draft.submission.id;

        draft.submission.confidence_score = Some(report.confidence_score);
        draft.submission.validation = Some(report.clone());

        let candidates = if auto_approve {
            draft.submission.status = SubmissionStatus::AutoApproved;
            draft.submission.reviewer_id = Some(AUTO_REVIEWER.to_string());
            draft.submission.reviewed_at = Some(now);
            draft.record(
                audit_event::AUTO_APPROVED,
                Some(format!("confidence {:.3} >= {:.2}", report.confidence_score, threshold)),
                now,
            );

            let records = CandidateRecord::all_from_extraction(
                &draft.submission.municipality_code,
                &extraction,
                Provenance::FlyerAuto,
                submission_id,
                now,
            );
            draft.record(
                audit_event::CANDIDATES_PUBLISHED,
                Some(format!("{} candidate record(s)", records.len())),
                now,
            );
            records
        } else {
            let why = if !report.is_valid {
                "validation flagged the document as invalid".to_string()
            } else {
                format!("confidence {:.3} < {:.2}", report.confidence_score, threshold)
            };
            draft.record(audit_event::PENDING, Some(why), now);
            Vec::new()
        };

        self.persist(&draft, &candidates).await?;

        tracing::info!(
            submission_id = %submission_id,
            status = %draft.submission.status,
            confidence = report.confidence_score,
            candidates = candidates.len(),
            "Submission decided"
        );

        Ok(IntakeOutcome {
            submission_id,
            status: draft.submission.status,
            confidence_score: report.confidence_score,
            extracted_summary: extraction.summary(),
            candidates_published: candidates.len(),
        })
    }

    async fn reject_at_gate(
        &self,
        mut draft: Draft,
        gate: RejectionGate,
        extraction: Option<ExtractionResult>,
        note: Option<String>,
    ) -> IntakeError {
        let now = self.clock.now();
        let submission_id = draft.submission.id;
        let code = match gate {
            RejectionGate::NotADocument => RejectionCode::NotADocument,
            RejectionGate::WrongCycle => RejectionCode::WrongCycle,
            RejectionGate::WrongMunicipality => RejectionCode::WrongMunicipality,
        };
        let reason = match &note {
            Some(note) => format!("{}: {}", gate, note),
            None => gate.to_string(),
        };

        draft.submission.extracted = extraction;
        draft.submission.reject_automatically(code, reason.clone(), now);
        draft.record(audit_event::GATE_REJECTED, Some(reason), now);

        if let Err(e) = self.persist(&draft, &[]).await {
            return e;
        }

        tracing::info!(submission_id = %submission_id, gate = %gate, "Submission rejected at hard gate");
        IntakeError::ContentRejected { gate, submission_id }
    }

    /// Record a collaborator failure that happened after the image was stored
    async fn record_collaborator_failure(
        &self,
        mut draft: Draft,
        service: &'static str,
        error: CollaboratorError,
    ) -> IntakeError {
        let now = self.clock.now();
        let submission_id = draft.submission.id;
        let malformed = matches!(error, CollaboratorError::Malformed(_));
        let code = if malformed {
            RejectionCode::AnalysisFailed
        } else {
            RejectionCode::UpstreamUnavailable
        };
        let event = if service == "validation" {
            audit_event::VALIDATION_FAILED
        } else {
            audit_event::EXTRACTION_FAILED
        };

        draft.submission.reject_automatically(code, format!("{} failed", service), now);
        draft.record(event, Some(error.to_string()), now);

        let recorded = match self.persist(&draft, &[]).await {
            Ok(()) => Some(submission_id),
            Err(e) => {
                tracing::error!(
                    submission_id = %submission_id,
                    error = %e,
                    "Could not record collaborator failure"
                );
                None
            }
        };

        if malformed {
            return IntakeError::inconsistency(format!(
                "{} response for submission {} could not be decoded: {}",
                service, submission_id, error
            ));
        }

        tracing::warn!(submission_id = %submission_id, service, error = %error, "Collaborator unavailable");
        IntakeError::UpstreamUnavailable {
            service,
            submission_id: recorded,
        }
    }

    /// Write submission, audit trail and candidate upserts in one transaction
    async fn persist(&self, draft: &Draft, candidates: &[CandidateRecord]) -> IntakeResult<()> {
        draft
            .submission
            .check_invariants()
            .map_err(IntakeError::inconsistency)?;

        let written = retry_on_lock(
            "submission commit",
            self.config.database.max_lock_wait_ms,
            || write_submission(&self.pool, draft, candidates),
        )
        .await;

        match written {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = IntakeError::from_store(e, None);
                if matches!(err, IntakeError::DuplicateSubmission { .. }) {
                    // Lost the race to an identical upload: nothing references the image
                    self.discard_object(&draft.object_key).await;
                } else {
                    tracing::warn!(
                        submission_id = %draft.submission.id,
                        key = %draft.object_key,
                        "Submission not recorded, stored image may be orphaned"
                    );
                }
                Err(err)
            }
        }
    }

    async fn discard_object(&self, key: &str) {
        match self.collaborators.storage.delete(key).await {
            Ok(()) => tracing::info!(key, "Discarded image of duplicate upload"),
            Err(e) => tracing::warn!(key, error = %e, "Could not discard orphaned image"),
        }
    }
}

async fn write_submission(
    pool: &SqlitePool,
    draft: &Draft,
    candidates: &[CandidateRecord],
) -> civic_common::Result<()> {
    let mut tx = pool.begin().await?;
    db::submissions::insert_submission(&mut tx, &draft.submission).await?;
    for entry in &draft.audit {
        db::submissions::insert_audit(&mut tx, draft.submission.id, entry).await?;
    }
    for record in candidates {
        db::candidates::upsert_candidate(&mut tx, record).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Cycle and municipality gates, in order
fn hard_gate(municipality: &Municipality, extraction: &ExtractionResult) -> Option<(RejectionGate, String)> {
    if !extraction.mentions_target_election {
        return Some((
            RejectionGate::WrongCycle,
            "no mention of the target election".to_string(),
        ));
    }
    let mentioned = extraction.municipality_mentioned.as_deref();
    if municipality_match::compare(&municipality.name, mentioned) == MunicipalityMatch::Mismatch {
        return Some((
            RejectionGate::WrongMunicipality,
            format!(
                "flyer names '{}', expected '{}'",
                mentioned.unwrap_or_default(),
                municipality.name
            ),
        ));
    }
    None
}

/// Clamp the confidence score into 0.0-1.0, logging when it was out of range
fn sanitize_report(submission_id: Uuid, mut report: ValidationReport) -> ValidationReport {
    let clamped = clamp_unit(report.confidence_score);
    if clamped != report.confidence_score {
        tracing::warn!(
            submission_id = %submission_id,
            reported = report.confidence_score,
            clamped,
            "Validation returned out-of-range confidence"
        );
        report.confidence_score = clamped;
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CriteriaBreakdown, CriterionScore, ExtractedCandidate};

    fn lyon() -> Municipality {
        Municipality {
            code: "69123".to_string(),
            name: "Lyon".to_string(),
            department_code: Some("69".to_string()),
        }
    }

    fn flyer(mentioned: Option<&str>, cycle: bool) -> ExtractionResult {
        ExtractionResult {
            candidates: vec![ExtractedCandidate {
                last_name: "Morel".to_string(),
                ..Default::default()
            }],
            mentions_target_election: cycle,
            municipality_mentioned: mentioned.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn cycle_gate_precedes_municipality_gate() {
        let gate = hard_gate(&lyon(), &flyer(Some("Marseille"), false));
        assert_eq!(gate.map(|(g, _)| g), Some(RejectionGate::WrongCycle));
    }

    #[test]
    fn unnamed_municipality_passes_gates() {
        assert!(hard_gate(&lyon(), &flyer(None, true)).is_none());
        assert!(hard_gate(&lyon(), &flyer(Some("LYON"), true)).is_none());
    }

    #[test]
    fn named_other_municipality_is_rejected() {
        let (gate, note) = hard_gate(&lyon(), &flyer(Some("Marseille"), true)).unwrap();
        assert_eq!(gate, RejectionGate::WrongMunicipality);
        assert!(note.contains("Marseille"));
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let report = ValidationReport {
            is_valid: true,
            confidence_score: 1.7,
            criteria: CriteriaBreakdown::uniform(CriterionScore::new(true, 1.0, None)),
            needs_human_review: false,
            review_reason: None,
        };
        assert_eq!(sanitize_report(Uuid::new_v4(), report).confidence_score, 1.0);
    }

    #[test]
    fn error_response_carries_retry_time() {
        let retry_after = Utc::now();
        let result: IntakeResult<IntakeOutcome> = Err(IntakeError::QuotaExceeded {
            axis: "ip",
            count: 5,
            limit: 5,
            retry_after,
        });
        let response = SubmitResponse::from_result(&result);
        assert_eq!(response.status, "rejected");
        assert_eq!(response.error_code.as_deref(), Some("QUOTA_EXCEEDED"));
        assert_eq!(response.retry_after, Some(retry_after));
        assert!(response.submission_id.is_none());
    }
}
