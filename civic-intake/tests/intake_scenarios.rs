//! End-to-end intake scenarios
//!
//! Each test drives `IntakeOrchestrator::submit` against scripted
//! collaborators and checks both the returned outcome and what was persisted.

mod helpers;

use chrono::{TimeZone, Utc};
use civic_intake::db;
use civic_intake::error::RejectionGate;
use civic_intake::models::{audit_event, Provenance, RejectionCode, SubmissionStatus, AUTO_REVIEWER};
use civic_intake::services::SubmissionRequest;
use civic_intake::{IntakeError, SubmitResponse};
use helpers::collaborators::{flyer, ExtractionScript, ValidationScript};
use helpers::{flyer_png, flyer_png_with_speck, not_an_image, Harness, LYON, MARSEILLE};

fn request(image: Vec<u8>, ip: &str) -> SubmissionRequest {
    SubmissionRequest::new(image, LYON, ip)
}

// ============================================================================
// Publication paths
// ============================================================================

#[tokio::test]
async fn well_formed_flyer_is_auto_approved() {
    let h = Harness::in_memory().await;
    h.extraction.answer(flyer("Lyon", 3));
    h.validation.score(0.95, true);

    let outcome = h
        .orchestrator
        .submit(request(flyer_png(1), "203.0.113.7").with_email("voter@example.org"))
        .await
        .unwrap();

    assert_eq!(outcome.status, SubmissionStatus::AutoApproved);
    assert!((outcome.confidence_score - 0.95).abs() < 1e-6);
    assert_eq!(outcome.candidates_published, 1);
    assert_eq!(outcome.extracted_summary.candidate_names, vec!["Amélie Durand".to_string()]);

    let candidates = db::candidates::list_candidates(&h.pool, LYON).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].program_statements.len(), 3);
    assert_eq!(candidates[0].party.as_deref(), Some("Ensemble pour la Ville"));
    assert_eq!(candidates[0].provenance, Provenance::FlyerAuto);
    assert_eq!(candidates[0].source_submission_id, Some(outcome.submission_id));

    let stored = db::submissions::load_submission(&h.pool, outcome.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.reviewer_id.as_deref(), Some(AUTO_REVIEWER));
    assert!(stored.reviewed_at.is_some());
    assert!(stored.rejection_reason.is_none());
    assert!(stored.fingerprint.starts_with("phash:"));
    assert_ne!(stored.submitter.ip_hash, "203.0.113.7");
    assert_eq!(stored.submitter.email.as_deref(), Some("voter@example.org"));
    assert_eq!(h.storage.len(), 1);

    let trail = h.workflow.audit_trail(outcome.submission_id).await.unwrap();
    let events: Vec<&str> = trail.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(
        events,
        vec![
            audit_event::RECEIVED,
            audit_event::STORED,
            audit_event::VALIDATED,
            audit_event::AUTO_APPROVED,
            audit_event::CANDIDATES_PUBLISHED,
        ]
    );
}

#[tokio::test]
async fn moderate_confidence_goes_to_pending() {
    let h = Harness::in_memory().await;
    h.validation.score(0.75, true);

    let outcome = h.orchestrator.submit(request(flyer_png(2), "203.0.113.8")).await.unwrap();

    assert_eq!(outcome.status, SubmissionStatus::Pending);
    assert_eq!(outcome.candidates_published, 0);
    assert_eq!(h.count_candidates().await, 0);

    let stored = db::submissions::load_submission(&h.pool, outcome.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.reviewer_id.is_none());
    assert!(stored.reviewed_at.is_none());
    assert!(stored.validation.is_some());
}

#[tokio::test]
async fn invalid_report_is_pending_even_with_high_confidence() {
    let h = Harness::in_memory().await;
    h.validation.score(0.99, false);

    let outcome = h.orchestrator.submit(request(flyer_png(3), "203.0.113.9")).await.unwrap();

    assert_eq!(outcome.status, SubmissionStatus::Pending);
    assert_eq!(h.count_candidates().await, 0);
}

#[tokio::test]
async fn confidence_exactly_at_threshold_auto_approves() {
    let h = Harness::in_memory().await;
    h.validation.score(0.90, true);

    let outcome = h.orchestrator.submit(request(flyer_png(4), "203.0.113.10")).await.unwrap();

    assert_eq!(outcome.status, SubmissionStatus::AutoApproved);
}

#[tokio::test]
async fn out_of_range_confidence_is_clamped_before_storage() {
    let h = Harness::in_memory().await;
    h.validation.score(1.4, true);

    let outcome = h.orchestrator.submit(request(flyer_png(5), "203.0.113.11")).await.unwrap();

    assert_eq!(outcome.confidence_score, 1.0);
    let stored = db::submissions::load_submission(&h.pool, outcome.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.confidence_score, Some(1.0));
}

// ============================================================================
// Duplicates
// ============================================================================

#[tokio::test]
async fn exact_reupload_is_duplicate() {
    let h = Harness::in_memory().await;
    let image = flyer_png(10);

    let first = h.orchestrator.submit(request(image.clone(), "198.51.100.1")).await.unwrap();
    let err = h
        .orchestrator
        .submit(request(image, "198.51.100.2"))
        .await
        .unwrap_err();

    match err {
        IntakeError::DuplicateSubmission { existing_id } => {
            assert_eq!(existing_id, Some(first.submission_id))
        }
        other => panic!("expected duplicate, got {:?}", other),
    }
    assert_eq!(h.count_submissions().await, 1);
    assert_eq!(h.extraction.calls(), 1);
    assert_eq!(h.storage.len(), 1);
}

#[tokio::test]
async fn near_identical_image_is_duplicate() {
    let h = Harness::in_memory().await;
    h.orchestrator.submit(request(flyer_png(11), "198.51.100.3")).await.unwrap();

    let err = h
        .orchestrator
        .submit(request(flyer_png_with_speck(11), "198.51.100.4"))
        .await
        .unwrap_err();

    assert!(matches!(err, IntakeError::DuplicateSubmission { .. }));
    assert_eq!(h.count_submissions().await, 1);
}

#[tokio::test]
async fn distinct_images_are_not_duplicates() {
    let h = Harness::in_memory().await;
    h.validation.score(0.5, true);

    for seed in 20..23 {
        h.orchestrator
            .submit(request(flyer_png(seed), &format!("198.51.100.{}", seed)))
            .await
            .unwrap();
    }
    assert_eq!(h.count_submissions().await, 3);
}

#[tokio::test]
async fn upload_losing_the_commit_race_leaves_no_image() {
    let h = Harness::in_memory().await;
    h.extraction.rendezvous(2);
    let image = flyer_png(13);

    let (first, second) = tokio::join!(
        h.orchestrator.submit(request(image.clone(), "198.51.100.7")),
        h.orchestrator.submit(request(image, "198.51.100.8")),
    );

    let results = [first, second];
    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(IntakeError::DuplicateSubmission { .. })))
        .count();
    assert_eq!((admitted, duplicates), (1, 1));
    // Both got past the pre-check and stored their image
    assert_eq!(h.extraction.calls(), 2);
    assert_eq!(h.storage.len(), 1);
    assert_eq!(h.count_submissions().await, 1);
}

#[tokio::test]
async fn gate_rejected_image_still_blocks_resubmission() {
    let h = Harness::in_memory().await;
    h.extraction.set(ExtractionScript::NotADocument);
    let image = flyer_png(12);

    h.orchestrator.submit(request(image.clone(), "198.51.100.5")).await.unwrap_err();
    let err = h.orchestrator.submit(request(image, "198.51.100.6")).await.unwrap_err();

    assert!(matches!(err, IntakeError::DuplicateSubmission { .. }));
}

// ============================================================================
// Hard gates
// ============================================================================

#[tokio::test]
async fn different_municipality_is_rejected() {
    let h = Harness::in_memory().await;
    h.extraction.answer(flyer("Marseille", 2));

    let err = h.orchestrator.submit(request(flyer_png(30), "192.0.2.1")).await.unwrap_err();

    let submission_id = match &err {
        IntakeError::ContentRejected {
            gate: RejectionGate::WrongMunicipality,
            submission_id,
        } => *submission_id,
        other => panic!("expected wrong municipality, got {:?}", other),
    };
    assert!(err.user_message().contains("wrong municipality"));
    assert_eq!(h.count_candidates().await, 0);
    assert_eq!(h.validation.calls(), 0);

    let stored = db::submissions::load_submission(&h.pool, submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, SubmissionStatus::Rejected);
    assert_eq!(stored.rejection_code, Some(RejectionCode::WrongMunicipality));
    assert!(stored.rejection_reason.as_deref().unwrap().contains("Marseille"));
    assert_eq!(stored.reviewer_id.as_deref(), Some(AUTO_REVIEWER));
    assert!(stored.extracted.is_some());

    let response = SubmitResponse::from_result(&Err(err));
    assert_eq!(response.status, "rejected");
    assert_eq!(response.submission_id, Some(submission_id));
    assert_eq!(response.error_code.as_deref(), Some("CONTENT_REJECTED"));
}

#[tokio::test]
async fn neighbouring_commune_with_similar_name_is_rejected() {
    let h = Harness::in_memory().await;
    h.extraction.answer(flyer("Marseillan", 2));
    h.validation.score(0.97, true);

    let err = h
        .orchestrator
        .submit(SubmissionRequest::new(flyer_png(90), MARSEILLE, "192.0.2.45"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IntakeError::ContentRejected {
            gate: RejectionGate::WrongMunicipality,
            ..
        }
    ));
    assert_eq!(h.count_candidates().await, 0);
    assert_eq!(h.validation.calls(), 0);
}

#[tokio::test]
async fn missing_cycle_mention_is_rejected() {
    let h = Harness::in_memory().await;
    let mut result = flyer("Lyon", 2);
    result.mentions_target_election = false;
    h.extraction.answer(result);

    let err = h.orchestrator.submit(request(flyer_png(31), "192.0.2.2")).await.unwrap_err();

    assert!(matches!(
        err,
        IntakeError::ContentRejected {
            gate: RejectionGate::WrongCycle,
            ..
        }
    ));
    assert_eq!(h.count_submissions().await, 1);
}

#[tokio::test]
async fn non_document_is_rejected_and_recorded() {
    let h = Harness::in_memory().await;
    h.extraction.set(ExtractionScript::NotADocument);

    let err = h.orchestrator.submit(request(flyer_png(32), "192.0.2.3")).await.unwrap_err();

    let submission_id = err.submission_id().unwrap();
    let stored = db::submissions::load_submission(&h.pool, submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.rejection_code, Some(RejectionCode::NotADocument));
    assert!(stored.raw_extraction.is_some());
    assert!(stored.extracted.is_none());
}

#[tokio::test]
async fn unnamed_municipality_is_not_a_rejection() {
    let h = Harness::in_memory().await;
    let mut result = flyer("Lyon", 1);
    result.municipality_mentioned = None;
    h.extraction.answer(result);
    h.validation.score(0.8, true);

    let outcome = h.orchestrator.submit(request(flyer_png(33), "192.0.2.4")).await.unwrap();

    assert_eq!(outcome.status, SubmissionStatus::Pending);
}

// ============================================================================
// Structural validation and upstream failures
// ============================================================================

#[tokio::test]
async fn non_image_is_rejected_before_quota() {
    let h = Harness::in_memory().await;

    for _ in 0..10 {
        let err = h
            .orchestrator
            .submit(request(not_an_image(), "192.0.2.50"))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::Validation(_)));
    }

    // Quota untouched: a real image from the same address still goes through
    h.orchestrator.submit(request(flyer_png(40), "192.0.2.50")).await.unwrap();
    assert_eq!(h.count_submissions().await, 1);
}

#[tokio::test]
async fn oversized_image_is_rejected() {
    let mut config = civic_intake::config::IntakeConfig::default();
    config.intake.max_image_bytes = 64;
    let h = Harness::with_config(config).await;

    let err = h.orchestrator.submit(request(flyer_png(41), "192.0.2.51")).await.unwrap_err();

    assert!(matches!(err, IntakeError::Validation(_)));
    assert_eq!(h.storage.len(), 0);
}

#[tokio::test]
async fn unknown_municipality_is_validation_error() {
    let h = Harness::in_memory().await;

    let err = h
        .orchestrator
        .submit(SubmissionRequest::new(flyer_png(42), "99999", "192.0.2.52"))
        .await
        .unwrap_err();

    assert!(matches!(err, IntakeError::Validation(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn extraction_outage_is_recorded_and_retryable() {
    let h = Harness::in_memory().await;
    h.extraction.set(ExtractionScript::Unavailable);
    let image = flyer_png(43);

    let err = h.orchestrator.submit(request(image.clone(), "192.0.2.53")).await.unwrap_err();

    let failed_id = match err {
        IntakeError::UpstreamUnavailable {
            service: "extraction",
            submission_id: Some(id),
        } => id,
        other => panic!("expected upstream failure, got {:?}", other),
    };
    let failed = db::submissions::load_submission(&h.pool, failed_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, SubmissionStatus::Rejected);
    assert_eq!(failed.rejection_code, Some(RejectionCode::UpstreamUnavailable));

    let trail = h.workflow.audit_trail(failed_id).await.unwrap();
    let failure = trail
        .iter()
        .find(|e| e.event == audit_event::EXTRACTION_FAILED)
        .unwrap();
    assert!(failure.detail.as_deref().unwrap().contains("connect timeout"));

    // Same image again once the service is back
    h.extraction.set(ExtractionScript::Document(flyer("Lyon", 3)));
    let retry = h.orchestrator.submit(request(image, "192.0.2.53")).await.unwrap();
    assert_eq!(retry.status, SubmissionStatus::AutoApproved);
    assert_eq!(h.count_submissions().await, 2);
}

#[tokio::test]
async fn validation_outage_is_recorded() {
    let h = Harness::in_memory().await;
    h.validation.set(ValidationScript::Unavailable);

    let err = h.orchestrator.submit(request(flyer_png(44), "192.0.2.54")).await.unwrap_err();

    assert!(err.is_retryable());
    let id = err.submission_id().unwrap();
    let trail = h.workflow.audit_trail(id).await.unwrap();
    assert!(trail.iter().any(|e| e.event == audit_event::VALIDATION_FAILED));
}

#[tokio::test]
async fn malformed_extraction_is_internal_inconsistency() {
    let h = Harness::in_memory().await;
    h.extraction.set(ExtractionScript::Malformed);

    let err = h.orchestrator.submit(request(flyer_png(45), "192.0.2.55")).await.unwrap_err();

    assert!(matches!(err, IntakeError::InternalInconsistency(_)));
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM submissions WHERE rejection_code = 'analysis_failed'",
    )
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn storage_failure_records_nothing() {
    let h = Harness::in_memory().await;
    h.storage.fail(true);

    let err = h.orchestrator.submit(request(flyer_png(46), "192.0.2.56")).await.unwrap_err();

    assert!(matches!(
        err,
        IntakeError::UpstreamUnavailable {
            service: "object storage",
            submission_id: None
        }
    ));
    assert_eq!(h.count_submissions().await, 0);
    assert_eq!(h.extraction.calls(), 0);
}

// ============================================================================
// Quotas
// ============================================================================

#[tokio::test]
async fn sixth_upload_from_one_ip_exceeds_quota() {
    let h = Harness::in_memory().await;
    h.validation.score(0.5, true);

    for seed in 50..55 {
        h.orchestrator.submit(request(flyer_png(seed), "203.0.113.99")).await.unwrap();
    }

    let err = h
        .orchestrator
        .submit(request(flyer_png(55), "203.0.113.99"))
        .await
        .unwrap_err();

    match err {
        IntakeError::QuotaExceeded {
            axis,
            count,
            limit,
            retry_after,
        } => {
            assert_eq!(axis, "ip");
            assert_eq!((count, limit), (5, 5));
            assert_eq!(retry_after, Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap());
        }
        other => panic!("expected quota error, got {:?}", other),
    }
    assert_eq!(h.count_submissions().await, 5);
    assert_eq!(h.extraction.calls(), 5);
}

#[tokio::test]
async fn device_quota_applies_across_addresses() {
    let h = Harness::in_memory().await;
    h.validation.score(0.5, true);

    for seed in 60..63 {
        h.orchestrator
            .submit(request(flyer_png(seed), &format!("10.0.0.{}", seed)).with_device("device-abc"))
            .await
            .unwrap();
    }

    let err = h
        .orchestrator
        .submit(request(flyer_png(63), "10.0.0.99").with_device("device-abc"))
        .await
        .unwrap_err();

    assert!(matches!(err, IntakeError::QuotaExceeded { axis: "device", .. }));
}

#[tokio::test]
async fn quota_resets_after_utc_midnight() {
    let h = Harness::in_memory().await;
    h.validation.score(0.5, true);

    for seed in 70..75 {
        h.orchestrator.submit(request(flyer_png(seed), "203.0.113.200")).await.unwrap();
    }
    assert!(h
        .orchestrator
        .submit(request(flyer_png(75), "203.0.113.200"))
        .await
        .is_err());

    h.clock.advance(chrono::Duration::hours(10));
    h.orchestrator.submit(request(flyer_png(75), "203.0.113.200")).await.unwrap();
}

// ============================================================================
// Totality
// ============================================================================

#[tokio::test]
async fn every_attempt_ends_in_exactly_one_terminal_state() {
    let h = Harness::in_memory().await;
    let scripts: Vec<(ExtractionScript, f32)> = vec![
        (ExtractionScript::Document(flyer("Lyon", 3)), 0.95),
        (ExtractionScript::Document(flyer("Lyon", 1)), 0.60),
        (ExtractionScript::Document(flyer("Grenoble", 1)), 0.95),
        (ExtractionScript::NotADocument, 0.95),
        (ExtractionScript::Unavailable, 0.95),
    ];

    for (i, (script, confidence)) in scripts.into_iter().enumerate() {
        h.extraction.set(script);
        h.validation.score(confidence, true);
        let result = h
            .orchestrator
            .submit(request(flyer_png(100 + i as u64), &format!("172.16.0.{}", i)))
            .await;

        let response = SubmitResponse::from_result(&result);
        assert!(
            ["auto_approved", "pending", "rejected"].contains(&response.status.as_str()),
            "unexpected status {}",
            response.status
        );

        match result {
            Ok(outcome) => {
                let stored = db::submissions::load_submission(&h.pool, outcome.submission_id)
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(stored.status, outcome.status);
                assert!(stored.check_invariants().is_ok());
            }
            Err(err) => {
                if let Some(id) = err.submission_id() {
                    let stored = db::submissions::load_submission(&h.pool, id).await.unwrap().unwrap();
                    assert_eq!(stored.status, SubmissionStatus::Rejected);
                    assert!(stored.check_invariants().is_ok());
                }
            }
        }
    }

    // One row per attempt that got past storage
    assert_eq!(h.count_submissions().await, 5);
}
