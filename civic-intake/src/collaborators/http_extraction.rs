//! HTTP client for the vision extraction service
//!
//! Sends the image (base64) with municipality context and decodes the reply
//! through [`super::decoder`]. The endpoint may answer with the extraction
//! object itself or wrap the model's text output as `{"text": "..."}`.

use super::decoder::{decode_extraction_response, decode_extraction_value};
use super::{CollaboratorError, ExtractionService};
use crate::models::ExtractionResponse;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use governor::{Quota, RateLimiter};
use serde::Serialize;
use std::num::NonZeroU32;
use std::time::Duration;

const USER_AGENT: &str = concat!("civic-intake/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    image_base64: String,
    municipality_name: &'a str,
    municipality_code: &'a str,
}

pub struct HttpExtractionClient {
    http_client: reqwest::Client,
    endpoint: String,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpExtractionClient {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        requests_per_second: u32,
    ) -> Result<Self, CollaboratorError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Unavailable(format!("HTTP client build failed: {}", e)))?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }
}

/// Decode a response body that is either the extraction or a text wrapper
fn decode_body(body: &str) -> Result<ExtractionResponse, CollaboratorError> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(text) = value.get("text").and_then(|t| t.as_str()) {
            return decode_extraction_response(text)
                .map_err(|e| CollaboratorError::Malformed(e.to_string()));
        }
        return decode_extraction_value(value).map_err(|e| CollaboratorError::Malformed(e.to_string()));
    }
    decode_extraction_response(body).map_err(|e| CollaboratorError::Malformed(e.to_string()))
}

#[async_trait]
impl ExtractionService for HttpExtractionClient {
    async fn analyze(
        &self,
        image: &[u8],
        municipality_name: &str,
        municipality_code: &str,
    ) -> Result<ExtractionResponse, CollaboratorError> {
        self.rate_limiter.until_ready().await;

        let request = AnalyzeRequest {
            image_base64: general_purpose::STANDARD.encode(image),
            municipality_name,
            municipality_code,
        };

        tracing::debug!(
            endpoint = %self.endpoint,
            municipality = municipality_code,
            image_bytes = image.len(),
            "Requesting flyer extraction"
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("Extraction request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("Reading extraction body failed: {}", e)))?;

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CollaboratorError::Unavailable(format!(
                "Extraction service returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(CollaboratorError::Rejected(format!(
                "Extraction service returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        decode_body(&body)
    }
}
