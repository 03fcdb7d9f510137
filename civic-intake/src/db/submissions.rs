//! Submission store
//!
//! Rows rejected because analysis failed (`upstream_unavailable`,
//! `analysis_failed`) never block a resubmission: every duplicate query here
//! uses the same predicate as the partial unique index on `fingerprint`.

use super::{from_json, parse_uuid, to_json};
use crate::models::{
    AuditEntry, RejectionCode, Submission, SubmissionStatus, SubmitterIdentity,
};
use chrono::{DateTime, Utc};
use civic_common::time::{from_db, to_db};
use civic_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Rows that take part in duplicate detection
const BLOCKS_RESUBMISSION: &str =
    "(rejection_code IS NULL OR rejection_code NOT IN ('upstream_unavailable', 'analysis_failed'))";

const SUBMISSION_COLUMNS: &str = r#"
    id, municipality_code, municipality_name, ip_hash, device_hash, submitter_email,
    image_url, fingerprint, content_hash, raw_extraction, extracted_fields,
    confidence_score, status, rejection_code, rejection_reason, validation_breakdown,
    reviewer_id, reviewed_at, created_at
"#;

/// Insert a new submission row
///
/// A uniqueness violation here means a concurrent upload of the same image
/// won the race; callers map it to a duplicate.
pub async fn insert_submission(conn: &mut SqliteConnection, submission: &Submission) -> Result<()> {
    let raw_extraction = submission.raw_extraction.as_ref().map(to_json).transpose()?;
    let extracted = submission.extracted.as_ref().map(to_json).transpose()?;
    let validation = submission.validation.as_ref().map(to_json).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO submissions (
            id, municipality_code, municipality_name, ip_hash, device_hash, submitter_email,
            image_url, fingerprint, content_hash, raw_extraction, extracted_fields,
            confidence_score, status, rejection_code, rejection_reason, validation_breakdown,
            reviewer_id, reviewed_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(submission.id.to_string())
    .bind(&submission.municipality_code)
    .bind(&submission.municipality_name)
    .bind(&submission.submitter.ip_hash)
    .bind(&submission.submitter.device_hash)
    .bind(&submission.submitter.email)
    .bind(&submission.image_url)
    .bind(&submission.fingerprint)
    .bind(&submission.content_hash)
    .bind(raw_extraction)
    .bind(extracted)
    .bind(submission.confidence_score.map(f64::from))
    .bind(submission.status.as_str())
    .bind(submission.rejection_code.map(|c| c.as_str()))
    .bind(&submission.rejection_reason)
    .bind(validation)
    .bind(&submission.reviewer_id)
    .bind(submission.reviewed_at.map(to_db))
    .bind(to_db(submission.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Write the decision fields of `submission`, only if the row is still in
/// `expected` status
///
/// Returns false when another writer moved the row first.
pub async fn update_decision(
    conn: &mut SqliteConnection,
    submission: &Submission,
    expected: SubmissionStatus,
) -> Result<bool> {
    let extracted = submission.extracted.as_ref().map(to_json).transpose()?;

    let result = sqlx::query(
        r#"
        UPDATE submissions
        SET status = ?, rejection_code = ?, rejection_reason = ?, extracted_fields = ?,
            reviewer_id = ?, reviewed_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(submission.status.as_str())
    .bind(submission.rejection_code.map(|c| c.as_str()))
    .bind(&submission.rejection_reason)
    .bind(extracted)
    .bind(&submission.reviewer_id)
    .bind(submission.reviewed_at.map(to_db))
    .bind(submission.id.to_string())
    .bind(expected.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Append one audit event
pub async fn insert_audit(conn: &mut SqliteConnection, submission_id: Uuid, entry: &AuditEntry) -> Result<()> {
    sqlx::query(
        "INSERT INTO submission_audit (submission_id, event, detail, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(submission_id.to_string())
    .bind(&entry.event)
    .bind(&entry.detail)
    .bind(to_db(entry.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn load_submission(pool: &SqlitePool, id: Uuid) -> Result<Option<Submission>> {
    let query = format!("SELECT {} FROM submissions WHERE id = ?", SUBMISSION_COLUMNS);
    let row = sqlx::query(&query)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_submission).transpose()
}

/// Audit trail of one submission, oldest first
pub async fn load_audit_trail(pool: &SqlitePool, submission_id: Uuid) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query(
        "SELECT event, detail, created_at FROM submission_audit WHERE submission_id = ? ORDER BY id",
    )
    .bind(submission_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(AuditEntry {
                event: row.get("event"),
                detail: row.get("detail"),
                created_at: from_db(row.get::<&str, _>("created_at"))?,
            })
        })
        .collect()
}

/// Pending submissions, oldest first
pub async fn list_pending(
    pool: &SqlitePool,
    municipality_code: Option<&str>,
    limit: u32,
) -> Result<Vec<Submission>> {
    let query = format!(
        r#"
        SELECT {} FROM submissions
        WHERE status = 'pending' AND (?1 IS NULL OR municipality_code = ?1)
        ORDER BY created_at, id
        LIMIT ?2
        "#,
        SUBMISSION_COLUMNS
    );
    let rows = sqlx::query(&query)
        .bind(municipality_code)
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_submission).collect()
}

/// Exact-match duplicate lookup by byte digest or stored fingerprint
pub async fn find_exact_duplicate(
    pool: &SqlitePool,
    content_hash: &str,
    fingerprint: &str,
) -> Result<Option<Uuid>> {
    let query = format!(
        r#"
        SELECT id FROM submissions
        WHERE (content_hash = ? OR fingerprint = ?) AND {}
        ORDER BY created_at
        LIMIT 1
        "#,
        BLOCKS_RESUBMISSION
    );
    let id: Option<String> = sqlx::query_scalar(&query)
        .bind(content_hash)
        .bind(fingerprint)
        .fetch_optional(pool)
        .await?;

    id.as_deref().map(parse_uuid).transpose()
}

/// Stored perceptual fingerprints eligible for near-duplicate comparison
pub async fn perceptual_fingerprints(pool: &SqlitePool) -> Result<Vec<(Uuid, String)>> {
    let query = format!(
        "SELECT id, fingerprint FROM submissions WHERE fingerprint LIKE 'phash:%' AND {}",
        BLOCKS_RESUBMISSION
    );
    let rows = sqlx::query(&query).fetch_all(pool).await?;

    rows.iter()
        .map(|row| Ok((parse_uuid(row.get::<&str, _>("id"))?, row.get("fingerprint"))))
        .collect()
}

/// Ids of pending submissions created before `cutoff`
pub async fn stale_pending_ids(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM submissions WHERE status = 'pending' AND created_at < ? ORDER BY created_at",
    )
    .bind(to_db(cutoff))
    .fetch_all(pool)
    .await?;

    ids.iter().map(|id| parse_uuid(id)).collect()
}

pub async fn count_by_status(pool: &SqlitePool, status: SubmissionStatus) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn row_to_submission(row: &SqliteRow) -> Result<Submission> {
    let status_str: &str = row.get("status");
    let status = SubmissionStatus::parse(status_str)
        .ok_or_else(|| Error::Internal(format!("Unknown submission status '{}'", status_str)))?;

    let rejection_code = row
        .get::<Option<&str>, _>("rejection_code")
        .map(|code| {
            RejectionCode::parse(code)
                .ok_or_else(|| Error::Internal(format!("Unknown rejection code '{}'", code)))
        })
        .transpose()?;

    Ok(Submission {
        id: parse_uuid(row.get::<&str, _>("id"))?,
        municipality_code: row.get("municipality_code"),
        municipality_name: row.get("municipality_name"),
        submitter: SubmitterIdentity {
            ip_hash: row.get("ip_hash"),
            device_hash: row.get("device_hash"),
            email: row.get("submitter_email"),
        },
        image_url: row.get("image_url"),
        fingerprint: row.get("fingerprint"),
        content_hash: row.get("content_hash"),
        raw_extraction: row
            .get::<Option<&str>, _>("raw_extraction")
            .map(|v| from_json("raw_extraction", v))
            .transpose()?,
        extracted: row
            .get::<Option<&str>, _>("extracted_fields")
            .map(|v| from_json("extracted_fields", v))
            .transpose()?,
        confidence_score: row.get::<Option<f64>, _>("confidence_score").map(|v| v as f32),
        status,
        rejection_code,
        rejection_reason: row.get("rejection_reason"),
        validation: row
            .get::<Option<&str>, _>("validation_breakdown")
            .map(|v| from_json("validation_breakdown", v))
            .transpose()?,
        reviewer_id: row.get("reviewer_id"),
        reviewed_at: row
            .get::<Option<&str>, _>("reviewed_at")
            .map(from_db)
            .transpose()?,
        created_at: from_db(row.get::<&str, _>("created_at"))?,
    })
}
