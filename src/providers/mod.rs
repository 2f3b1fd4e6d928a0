//! Upstream LLM access.
//!
//! - [`UpstreamTransport`] performs one HTTP exchange and reports the raw
//!   status and body, or a transport-level failure.
//! - [`gemini::GeminiTransport`] is the reqwest-backed implementation.
//! - [`retry::UpstreamClient`] drives a transport through the retry/backoff
//!   state machine and classifies terminal failures.

pub mod gemini;
pub mod retry;

use async_trait::async_trait;
use serde_json::Value;

pub use gemini::GeminiTransport;
pub use retry::{
    classify, AttemptOutcome, RetryPolicy, RetryState, Sleeper, Step, TokioSleeper, UpstreamClient,
};

/// Maximum characters of an upstream error body kept in error details.
const MAX_DETAIL_CHARS: usize = 500;

/// Raw upstream reply: any HTTP status with its body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub status: u16,
    pub body: String,
}

impl RawReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure before any HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request did not complete within the client timeout. Retryable.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// DNS, connect, TLS or other connection failure. Not retryable.
    #[error("connection failed: {0}")]
    Connect(String),
}

/// One request/response exchange with the LLM endpoint.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Send `payload`, authenticating with the caller-supplied `credential`.
    async fn send(&self, credential: &str, payload: &Value)
        -> std::result::Result<RawReply, TransportError>;

    /// Model identifier the transport targets.
    fn model(&self) -> &str;
}

/// Extract a human-readable message from an upstream error body.
///
/// Google APIs answer `{"error": {"message": "..."}}`; anything else is
/// returned compacted and truncated.
pub fn error_detail(body: &str) -> String {
    if let Some(msg) = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
    {
        return msg;
    }
    let compact = body.replace(['\n', '\r'], " ");
    let compact = compact.trim();
    if compact.chars().count() > MAX_DETAIL_CHARS {
        let head: String = compact.chars().take(MAX_DETAIL_CHARS).collect();
        format!("{head}…")
    } else {
        compact.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_reply_success_range() {
        assert!(RawReply::new(200, "").is_success());
        assert!(RawReply::new(204, "").is_success());
        assert!(!RawReply::new(429, "").is_success());
        assert!(!RawReply::new(301, "").is_success());
    }

    #[test]
    fn test_error_detail_prefers_google_error_message() {
        let body = r#"{"error": {"code": 403, "message": "Permission denied on model", "status": "PERMISSION_DENIED"}}"#;
        assert_eq!(error_detail(body), "Permission denied on model");
    }

    #[test]
    fn test_error_detail_falls_back_to_compact_body() {
        assert_eq!(error_detail("bad\ngateway\r\n"), "bad gateway");
    }

    #[test]
    fn test_error_detail_truncates_long_bodies() {
        let body = "x".repeat(2000);
        let detail = error_detail(&body);
        assert!(detail.ends_with('…'));
        assert_eq!(detail.chars().count(), MAX_DETAIL_CHARS + 1);
    }
}
