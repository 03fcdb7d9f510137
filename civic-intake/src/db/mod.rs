//! Database access layer for civic-intake
//!
//! Plain functions over a pool or a connection. Writes that must land
//! together take a `&mut SqliteConnection` so callers can run them inside one
//! transaction.

pub mod candidates;
pub mod counters;
pub mod submissions;

use civic_common::{Error, Result};
use uuid::Uuid;

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid UUID '{}': {}", value, e)))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(format!("JSON encode failed: {}", e)))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(column: &str, value: &str) -> Result<T> {
    serde_json::from_str(value)
        .map_err(|e| Error::Internal(format!("Invalid JSON in column {}: {}", column, e)))
}
