//! Multi-axis daily quotas
//!
//! Windows are fixed 24h buckets anchored at UTC midnight. An action is
//! allowed only if every applicable axis is under its limit; the first axis
//! at its limit is reported. All axes are reserved in one transaction with
//! conditional upserts, so concurrent requests cannot push a counter past
//! its limit.
//!
//! Lock contention is retried. When the counter store cannot be reached at
//! all the limiter fails open and logs a warning.

use crate::config::QuotaSettings;
use crate::db::counters::{self, CounterKey};
use crate::error::{IntakeError, IntakeResult};
use crate::utils::retry_on_lock;
use chrono::{DateTime, Duration, Utc};
use civic_common::time::{next_utc_midnight, window_start, Clock};
use sqlx::SqlitePool;
use std::sync::Arc;

const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Rate-limited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    DocumentUpload,
    QuizCompletion,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::DocumentUpload => "document_upload",
            ActionType::QuizCompletion => "quiz_completion",
        }
    }
}

/// Axis a counter is kept on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierType {
    Ip,
    Device,
    Municipality,
}

impl IdentifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::Ip => "ip",
            IdentifierType::Device => "device",
            IdentifierType::Municipality => "municipality",
        }
    }
}

/// One identifier on one axis
///
/// `value` is already hashed for ip/device; municipality codes are public.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub kind: IdentifierType,
    pub value: String,
}

impl Identifier {
    pub fn ip(hash: impl Into<String>) -> Self {
        Self { kind: IdentifierType::Ip, value: hash.into() }
    }

    pub fn device(hash: impl Into<String>) -> Self {
        Self { kind: IdentifierType::Device, value: hash.into() }
    }

    pub fn municipality(code: impl Into<String>) -> Self {
        Self { kind: IdentifierType::Municipality, value: code.into() }
    }

    fn key(&self, action: ActionType) -> CounterKey<'_> {
        CounterKey {
            identifier_type: self.kind.as_str(),
            identifier_hash: &self.value,
            action_type: action.as_str(),
        }
    }
}

/// Outcome of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub count: u32,
    pub limit: u32,
    /// Next UTC midnight when not allowed
    pub retry_after: Option<DateTime<Utc>>,
}

/// Result of reserving one action across every axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reservation {
    Granted,
    Refused {
        axis: &'static str,
        count: u32,
        limit: u32,
    },
}

pub struct RateLimiter {
    pool: SqlitePool,
    quotas: QuotaSettings,
    clock: Arc<dyn Clock>,
    max_lock_wait_ms: u64,
}

impl RateLimiter {
    pub fn new(pool: SqlitePool, quotas: QuotaSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            quotas,
            clock,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    /// Bound for lock-contention retries on counter writes
    pub fn with_max_lock_wait(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    /// Daily limit for `action` on `axis`, `None` when the axis is not limited
    pub fn limit_for(&self, action: ActionType, axis: IdentifierType) -> Option<u32> {
        match (action, axis) {
            (ActionType::DocumentUpload, IdentifierType::Ip) => Some(self.quotas.uploads_per_ip),
            (ActionType::DocumentUpload, IdentifierType::Device) => Some(self.quotas.uploads_per_device),
            (ActionType::DocumentUpload, IdentifierType::Municipality) => {
                self.quotas.uploads_per_municipality
            }
            (ActionType::QuizCompletion, IdentifierType::Ip) => Some(self.quotas.quiz_completions_per_ip),
            (ActionType::QuizCompletion, _) => None,
        }
    }

    /// Read-only check of one identifier against `limit`
    pub async fn check(&self, identifier: &Identifier, action: ActionType, limit: u32) -> RateLimitDecision {
        let now = self.clock.now();
        let count = match counters::current_count(&self.pool, identifier.key(action), window_start(now)).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    axis = identifier.kind.as_str(),
                    action = action.as_str(),
                    "Rate limit store unavailable, allowing request"
                );
                0
            }
        };

        let allowed = count < limit;
        RateLimitDecision {
            allowed,
            count,
            limit,
            retry_after: (!allowed).then(|| next_utc_midnight(now)),
        }
    }

    /// Atomically count one action; returns the new count
    ///
    /// `None` when the store could not be reached (the action is not counted).
    pub async fn increment(&self, identifier: &Identifier, action: ActionType) -> Option<u32> {
        let now = self.clock.now();
        let key = identifier.key(action);
        let counted = retry_on_lock("rate limit increment", self.max_lock_wait_ms, || {
            counters::increment(&self.pool, key, window_start(now), now)
        })
        .await;

        match counted {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    axis = identifier.kind.as_str(),
                    action = action.as_str(),
                    "Rate limit increment failed, action not counted"
                );
                None
            }
        }
    }

    /// Reserve one action on every applicable axis, or refuse it
    ///
    /// Nothing is counted when any axis is at its limit. Lock contention that
    /// outlasts the retry budget is reported as a retryable error rather than
    /// letting the request through uncounted.
    pub async fn enforce(&self, action: ActionType, identifiers: &[Identifier]) -> IntakeResult<()> {
        let applicable: Vec<(&Identifier, u32)> = identifiers
            .iter()
            .filter_map(|id| self.limit_for(action, id.kind).map(|limit| (id, limit)))
            .collect();
        if applicable.is_empty() {
            return Ok(());
        }

        let now = self.clock.now();
        let reservation = retry_on_lock("rate limit reservation", self.max_lock_wait_ms, || {
            reserve_all(&self.pool, action, &applicable, now)
        })
        .await;

        match reservation {
            Ok(Reservation::Granted) => Ok(()),
            Ok(Reservation::Refused { axis, count, limit }) => {
                tracing::info!(axis, action = action.as_str(), count, limit, "Quota exceeded");
                Err(IntakeError::QuotaExceeded {
                    axis,
                    count,
                    limit,
                    retry_after: next_utc_midnight(now),
                })
            }
            Err(e) if e.is_lock_contention() => {
                tracing::warn!(error = %e, action = action.as_str(), "Rate limit store contended");
                Err(IntakeError::UpstreamUnavailable {
                    service: "rate limit store",
                    submission_id: None,
                })
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    action = action.as_str(),
                    "Rate limit store unavailable, allowing request"
                );
                Ok(())
            }
        }
    }

    /// Delete counters older than the retention horizon; returns rows removed
    pub async fn purge_stale(&self, now: DateTime<Utc>) -> civic_common::Result<u64> {
        let cutoff = window_start(now) - Duration::days(self.quotas.counter_retention_days);
        let removed = counters::purge_before(&self.pool, cutoff).await?;
        tracing::info!(removed, cutoff = %cutoff, "Purged stale rate limit counters");
        Ok(removed)
    }
}

/// Count the action on every axis in one transaction
///
/// Rolls back as soon as one axis is at its limit.
async fn reserve_all(
    pool: &SqlitePool,
    action: ActionType,
    applicable: &[(&Identifier, u32)],
    now: DateTime<Utc>,
) -> civic_common::Result<Reservation> {
    let window = window_start(now);
    let mut tx = pool.begin().await?;

    for (identifier, limit) in applicable {
        let key = identifier.key(action);
        if counters::increment_below(&mut tx, key, window, now, *limit)
            .await?
            .is_none()
        {
            let count = counters::current_count(&mut *tx, key, window).await?;
            tx.rollback().await?;
            return Ok(Reservation::Refused {
                axis: identifier.kind.as_str(),
                count,
                limit: *limit,
            });
        }
    }

    tx.commit().await?;
    Ok(Reservation::Granted)
}
