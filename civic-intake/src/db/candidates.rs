//! Candidate record upserts
//!
//! Keyed by (municipality code, normalized name). A later flyer refreshes the
//! record; fields the new flyer leaves empty keep their previous value.

use super::{from_json, parse_uuid, to_json};
use crate::models::{CandidateRecord, Provenance};
use civic_common::time::{from_db, to_db};
use civic_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

/// Insert or refresh one candidate record
pub async fn upsert_candidate(conn: &mut SqliteConnection, record: &CandidateRecord) -> Result<()> {
    let statements = to_json(&record.program_statements)?;

    sqlx::query(
        r#"
        INSERT INTO candidates (
            municipality_code, normalized_name, display_name, first_name, last_name,
            role_hint, party, list_name, program_statements, provenance,
            source_submission_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(municipality_code, normalized_name) DO UPDATE SET
            display_name = excluded.display_name,
            first_name = COALESCE(excluded.first_name, candidates.first_name),
            last_name = excluded.last_name,
            role_hint = COALESCE(excluded.role_hint, candidates.role_hint),
            party = COALESCE(excluded.party, candidates.party),
            list_name = COALESCE(excluded.list_name, candidates.list_name),
            program_statements = CASE
                WHEN excluded.program_statements = '[]' THEN candidates.program_statements
                ELSE excluded.program_statements
            END,
            provenance = excluded.provenance,
            source_submission_id = excluded.source_submission_id,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.municipality_code)
    .bind(&record.normalized_name)
    .bind(&record.display_name)
    .bind(&record.first_name)
    .bind(&record.last_name)
    .bind(&record.role_hint)
    .bind(&record.party)
    .bind(&record.list_name)
    .bind(statements)
    .bind(record.provenance.as_str())
    .bind(record.source_submission_id.map(|id| id.to_string()))
    .bind(to_db(record.updated_at))
    .bind(to_db(record.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn load_candidate(
    pool: &SqlitePool,
    municipality_code: &str,
    normalized_name: &str,
) -> Result<Option<CandidateRecord>> {
    let row = sqlx::query(
        "SELECT * FROM candidates WHERE municipality_code = ? AND normalized_name = ?",
    )
    .bind(municipality_code)
    .bind(normalized_name)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_candidate).transpose()
}

/// All candidates of a municipality, by normalized name
pub async fn list_candidates(pool: &SqlitePool, municipality_code: &str) -> Result<Vec<CandidateRecord>> {
    let rows = sqlx::query(
        "SELECT * FROM candidates WHERE municipality_code = ? ORDER BY normalized_name",
    )
    .bind(municipality_code)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_candidate).collect()
}

fn row_to_candidate(row: &SqliteRow) -> Result<CandidateRecord> {
    let provenance_str: &str = row.get("provenance");
    let provenance = Provenance::parse(provenance_str)
        .ok_or_else(|| Error::Internal(format!("Unknown provenance '{}'", provenance_str)))?;

    Ok(CandidateRecord {
        municipality_code: row.get("municipality_code"),
        normalized_name: row.get("normalized_name"),
        display_name: row.get("display_name"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        role_hint: row.get("role_hint"),
        party: row.get("party"),
        list_name: row.get("list_name"),
        program_statements: from_json("program_statements", row.get::<&str, _>("program_statements"))?,
        provenance,
        source_submission_id: row
            .get::<Option<&str>, _>("source_submission_id")
            .map(parse_uuid)
            .transpose()?,
        updated_at: from_db(row.get::<&str, _>("updated_at"))?,
    })
}
