//! Rate limit counter store
//!
//! One row per (identifier type, identifier hash, action, window start).
//! Increments are a single upsert, so concurrent requests never lose an
//! update. `increment_below` carries the limit into the upsert itself so a
//! counter can never pass it.

use chrono::{DateTime, Utc};
use civic_common::time::to_db;
use civic_common::Result;
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};

/// Counter identity within a window
#[derive(Debug, Clone, Copy)]
pub struct CounterKey<'a> {
    pub identifier_type: &'a str,
    pub identifier_hash: &'a str,
    pub action_type: &'a str,
}

/// Add one to the counter and return the new count
pub async fn increment(
    pool: &SqlitePool,
    key: CounterKey<'_>,
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u32> {
    let count: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO rate_limit_counters (
            identifier_type, identifier_hash, action_type, window_start, count, updated_at
        ) VALUES (?, ?, ?, ?, 1, ?)
        ON CONFLICT(identifier_type, identifier_hash, action_type, window_start)
        DO UPDATE SET count = count + 1, updated_at = excluded.updated_at
        RETURNING count
        "#,
    )
    .bind(key.identifier_type)
    .bind(key.identifier_hash)
    .bind(key.action_type)
    .bind(to_db(window_start))
    .bind(to_db(now))
    .fetch_one(pool)
    .await?;

    Ok(u32::try_from(count).unwrap_or(u32::MAX))
}

/// Add one to the counter only while it is below `limit`
///
/// Returns the new count, or `None` when the counter already sits at the
/// limit (nothing is written in that case).
pub async fn increment_below(
    conn: &mut SqliteConnection,
    key: CounterKey<'_>,
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
    limit: u32,
) -> Result<Option<u32>> {
    if limit == 0 {
        return Ok(None);
    }

    let count: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO rate_limit_counters (
            identifier_type, identifier_hash, action_type, window_start, count, updated_at
        ) VALUES (?, ?, ?, ?, 1, ?)
        ON CONFLICT(identifier_type, identifier_hash, action_type, window_start)
        DO UPDATE SET count = count + 1, updated_at = excluded.updated_at
        WHERE rate_limit_counters.count < ?
        RETURNING count
        "#,
    )
    .bind(key.identifier_type)
    .bind(key.identifier_hash)
    .bind(key.action_type)
    .bind(to_db(window_start))
    .bind(to_db(now))
    .bind(i64::from(limit))
    .fetch_optional(conn)
    .await?;

    Ok(count.map(|c| u32::try_from(c).unwrap_or(u32::MAX)))
}

/// Current count in the window (0 when no row exists yet)
pub async fn current_count<'e>(
    executor: impl SqliteExecutor<'e>,
    key: CounterKey<'_>,
    window_start: DateTime<Utc>,
) -> Result<u32> {
    let count: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT count FROM rate_limit_counters
        WHERE identifier_type = ? AND identifier_hash = ? AND action_type = ? AND window_start = ?
        "#,
    )
    .bind(key.identifier_type)
    .bind(key.identifier_hash)
    .bind(key.action_type)
    .bind(to_db(window_start))
    .fetch_optional(executor)
    .await?;

    Ok(count.map_or(0, |c| u32::try_from(c).unwrap_or(u32::MAX)))
}

/// Delete counters whose window started before `cutoff`
pub async fn purge_before(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM rate_limit_counters WHERE window_start < ?")
        .bind(to_db(cutoff))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
