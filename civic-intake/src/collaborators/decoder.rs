//! Extraction response decoder
//!
//! Vision models answer with JSON that is often wrapped in Markdown code
//! fences or preceded by a sentence of prose. This adapter isolates the JSON
//! object, parses it into the typed outcome and keeps the raw value for the
//! audit trail. Anything that does not parse is a typed error; callers never
//! see partially-cleaned strings.

use crate::models::{ExtractionOutcome, ExtractionResponse, ExtractionResult};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResponseDecodeError {
    #[error("Empty response")]
    Empty,

    #[error("No JSON object found in response")]
    NoJsonObject,

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shape the extraction model is prompted to produce
#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default = "default_true")]
    is_campaign_document: bool,
    #[serde(default)]
    non_document_reason: Option<String>,
    #[serde(flatten)]
    fields: ExtractionResult,
}

fn default_true() -> bool {
    true
}

/// Decode model text into an [`ExtractionResponse`]
pub fn decode_extraction_response(text: &str) -> Result<ExtractionResponse, ResponseDecodeError> {
    let json = isolate_json_object(text)?;
    let raw: serde_json::Value = serde_json::from_str(json)?;
    decode_extraction_value(raw)
}

/// Decode an already-parsed JSON value
pub fn decode_extraction_value(raw: serde_json::Value) -> Result<ExtractionResponse, ResponseDecodeError> {
    let wire: WireResponse = serde_json::from_value(raw.clone())?;

    let outcome = if wire.is_campaign_document {
        ExtractionOutcome::Document(wire.fields)
    } else {
        ExtractionOutcome::NotADocument {
            reason: wire.non_document_reason,
        }
    };

    Ok(ExtractionResponse { outcome, raw })
}

/// Slice out the outermost `{ ... }`, skipping fences and prose
fn isolate_json_object(text: &str) -> Result<&str, ResponseDecodeError> {
    let trimmed = strip_code_fence(text.trim());
    if trimmed.is_empty() {
        return Err(ResponseDecodeError::Empty);
    }

    let start = trimmed.find('{').ok_or(ResponseDecodeError::NoJsonObject)?;
    let end = trimmed.rfind('}').ok_or(ResponseDecodeError::NoJsonObject)?;
    if end < start {
        return Err(ResponseDecodeError::NoJsonObject);
    }
    Ok(&trimmed[start..=end])
}

fn strip_code_fence(text: &str) -> &str {
    let Some(after_open) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json", "JSON", ...) on the opening line
    let body = match after_open.find('\n') {
        Some(newline) => &after_open[newline + 1..],
        None => after_open,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
