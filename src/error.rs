//! Error types for the decoder.
//!
//! [`DecoderError`] is the single error surfaced by [`crate::decoder::Decoder::decode`].
//! Upstream failures carry an [`UpstreamError`] so callers (the HTTP layer, the
//! CLI) can report an accurate message and status for each failure kind.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Top-level error taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecoderError {
    /// Caller-correctable input problem (empty credential or document).
    #[error("{0}")]
    InvalidInput(String),

    /// The Gemini endpoint failed, after retries where applicable.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The upstream answer had an unexpected shape or unparseable content.
    #[error("{0}")]
    Extraction(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DecoderError {
    /// Stable machine-readable kind, used in logs and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Upstream(e) => e.kind(),
            Self::Extraction(_) => "extraction_error",
            Self::Config(_) => "config_error",
        }
    }

    /// HTTP status the API layer answers with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::Upstream(e) => e.http_status(),
            Self::Extraction(_) | Self::Config(_) => 500,
        }
    }
}

/// Classified failure of the upstream LLM call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// HTTP 400: bad credential or malformed request.
    #[error("Invalid API key or malformed request: {0}")]
    BadRequest(String),

    /// HTTP 403: credential lacks permission for the model.
    #[error("API key does not have permission for this model: {0}")]
    Forbidden(String),

    /// HTTP 404: unknown model.
    #[error("Model {model} not found. Try a different model.")]
    NotFound { model: String },

    /// HTTP 429 on every attempt.
    #[error("{0}")]
    RateLimited(String),

    /// Transport-level timeout on every attempt.
    #[error("{0}")]
    Timeout(String),

    /// Connection-level failure (DNS, refused, TLS). Never retried.
    #[error("Failed to connect to Gemini API: {0}")]
    Connect(String),

    /// Any other non-success status.
    #[error("Gemini API error: {status}")]
    Status { status: u16, detail: String },
}

impl UpstreamError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) | Self::Forbidden(_) => "upstream_auth_error",
            Self::NotFound { .. } => "upstream_not_found",
            Self::RateLimited(_) => "upstream_rate_limited",
            Self::Timeout(_) | Self::Connect(_) => "upstream_transport_error",
            Self::Status { .. } => "upstream_error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Forbidden(_) => 403,
            Self::NotFound { .. } => 404,
            Self::RateLimited(_) => 429,
            Self::Timeout(_) => 504,
            // Unreachable upstream is a gateway failure, not a generic 500.
            Self::Connect(_) => 502,
            Self::Status { .. } => 500,
        }
    }

    /// Whether the retry machine absorbs this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Timeout(_))
    }
}
