//! Gemini `generateContent` transport.
//!
//! The caller-supplied API key is sent as the `?key=` query parameter and is
//! never logged: reqwest errors are stripped of their URL before they are
//! turned into error details.
//!
//! Thinking model support: Gemini 2.5 models return parts tagged
//! `thought: true`. [`extract_text`] filters those out and only returns the
//! final non-thought text.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{RawReply, TransportError, UpstreamTransport};
use crate::config::UpstreamConfig;
use crate::error::{DecoderError, Result};

// ── Request/response shapes ──────────────────────────────────────────────────

/// Build a single-turn `generateContent` request body.
pub fn build_request_body(prompt: &str, temperature: f32, max_output_tokens: u32) -> Value {
    json!({
        "contents": [{
            "parts": [{ "text": prompt }]
        }],
        "generationConfig": {
            "temperature": temperature,
            "maxOutputTokens": max_output_tokens
        }
    })
}

/// Extract final answer text from a Gemini API response.
///
/// Thought parts are skipped. If no non-thought parts exist, the thought text
/// is returned instead. `None` when `candidates[0].content.parts` is missing
/// or carries no text at all.
pub fn extract_text(response: &Value) -> Option<String> {
    let parts = response["candidates"][0]["content"]["parts"].as_array()?;

    let final_parts: Vec<&str> = parts
        .iter()
        .filter(|p| !p["thought"].as_bool().unwrap_or(false))
        .filter_map(|p| p["text"].as_str())
        .collect();

    if !final_parts.is_empty() {
        return Some(final_parts.join(""));
    }

    let thought_parts: Vec<&str> = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if !thought_parts.is_empty() {
        Some(thought_parts.join(""))
    } else {
        None
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

/// reqwest-backed Gemini transport.
pub struct GeminiTransport {
    client: Client,
    api_base: String,
    model: String,
}

impl std::fmt::Debug for GeminiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiTransport")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiTransport {
    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        Self::new(&config.api_base, &config.model, config.timeout())
    }

    pub fn new(api_base: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DecoderError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    /// Full URL for `generateContent` on the configured model.
    pub fn api_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }
}

#[async_trait]
impl UpstreamTransport for GeminiTransport {
    async fn send(
        &self,
        credential: &str,
        payload: &Value,
    ) -> std::result::Result<RawReply, TransportError> {
        debug!(model = %self.model, "Gemini request");

        let response = self
            .client
            .post(self.api_url())
            .query(&[("key", credential)])
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        Ok(RawReply { status, body })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    // The URL carries the API key.
    let err = err.without_url();
    let detail = format_reqwest_error(&err);
    if err.is_timeout() {
        TransportError::Timeout(detail)
    } else {
        TransportError::Connect(detail)
    }
}

/// Keep chained causes so DNS/TLS/socket failures are visible.
fn format_reqwest_error(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }

    message
}

// ── Tests ─────────────────────────────────────────────────────────────────────
