//! jd-decoder: a caching, deduplicating proxy that turns job descriptions
//! into structured extraction results using Gemini.
//!
//! The service pieces:
//!
//! - [`cache`]: document fingerprints, the TTL + LRU result cache, and the
//!   in-flight coordinator that collapses concurrent identical requests
//! - [`providers`]: the upstream transport trait, the Gemini transport, and
//!   the retry/backoff client
//! - [`decoder`]: request orchestration tying the above together
//! - [`api`]: the axum HTTP surface

pub mod api;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod error;
pub mod extraction;
pub mod health;
pub mod providers;

pub use cache::{fingerprint, CacheStats, Fingerprint, InFlightCoordinator, ResultCache};
pub use config::Config;
pub use decoder::Decoder;
pub use error::{DecoderError, Result, UpstreamError};
pub use extraction::ExtractionResult;
pub use health::UsageMetrics;
pub use providers::{GeminiTransport, RetryPolicy, UpstreamClient, UpstreamTransport};
