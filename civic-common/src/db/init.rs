//! Database initialization
//!
//! Opens (or creates) the SQLite database and brings the schema up to date.
//! Every statement is idempotent, so this is safe to run on each start.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// How long a connection waits on a locked database before reporting it;
/// longer waits are handled by `retry_on_lock` with backoff
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // WAL allows concurrent readers alongside the single writer
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// Each SQLite in-memory connection is its own database, so the pool is
/// pinned to one connection that is never recycled.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index used by the intake service
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_submissions_table(pool).await?;
    create_submission_audit_table(pool).await?;
    create_rate_limit_counters_table(pool).await?;
    create_candidates_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    info!("Database schema ready (version {})", SCHEMA_VERSION);
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Submissions: one row per accepted, non-duplicate intake attempt
///
/// The CHECK constraints mirror the status/rejection/reviewer invariants.
/// The partial unique index on `fingerprint` is the authoritative duplicate
/// guard; rows rejected because analysis failed stay out of it so the
/// submitter can retry the same image.
async fn create_submissions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submissions (
            id TEXT PRIMARY KEY,
            municipality_code TEXT NOT NULL,
            municipality_name TEXT NOT NULL,
            ip_hash TEXT NOT NULL,
            device_hash TEXT,
            submitter_email TEXT,
            image_url TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            raw_extraction TEXT,
            extracted_fields TEXT,
            confidence_score REAL CHECK (confidence_score IS NULL OR (confidence_score >= 0.0 AND confidence_score <= 1.0)),
            status TEXT NOT NULL CHECK (status IN ('pending', 'auto_approved', 'approved', 'rejected')),
            rejection_code TEXT,
            rejection_reason TEXT,
            validation_breakdown TEXT,
            reviewer_id TEXT,
            reviewed_at TEXT,
            created_at TEXT NOT NULL,
            CHECK (status NOT IN ('approved', 'auto_approved') OR rejection_reason IS NULL),
            CHECK (status != 'rejected' OR rejection_reason IS NOT NULL),
            CHECK ((reviewer_id IS NULL) = (reviewed_at IS NULL))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_submissions_fingerprint
        ON submissions(fingerprint)
        WHERE rejection_code IS NULL OR rejection_code NOT IN ('upstream_unavailable', 'analysis_failed')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_submissions_content_hash ON submissions(content_hash)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status, municipality_code, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Append-only audit events for a submission
async fn create_submission_audit_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submission_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            submission_id TEXT NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
            event TEXT NOT NULL,
            detail TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_submission_audit_submission ON submission_audit(submission_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Quota counters, one row per (identifier, action, UTC day)
async fn create_rate_limit_counters_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rate_limit_counters (
            identifier_type TEXT NOT NULL,
            identifier_hash TEXT NOT NULL,
            action_type TEXT NOT NULL,
            window_start TEXT NOT NULL,
            count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
            updated_at TEXT NOT NULL,
            PRIMARY KEY (identifier_type, identifier_hash, action_type, window_start)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rate_limit_counters_window ON rate_limit_counters(window_start)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Published candidate records keyed by (municipality, normalized name)
async fn create_candidates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS candidates (
            municipality_code TEXT NOT NULL,
            normalized_name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            first_name TEXT,
            last_name TEXT NOT NULL,
            role_hint TEXT,
            party TEXT,
            list_name TEXT,
            program_statements TEXT NOT NULL DEFAULT '[]',
            provenance TEXT NOT NULL,
            source_submission_id TEXT REFERENCES submissions(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (municipality_code, normalized_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
