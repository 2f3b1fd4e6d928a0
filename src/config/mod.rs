//! Runtime configuration.
//!
//! Loaded from `~/.jd-decoder/config.json` (or the path in `JD_DECODER_CONFIG`),
//! then overridden by environment variables. A missing file yields defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DecoderError, Result};

/// Default Gemini model when neither the config file nor `GEMINI_MODEL` set one.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Gemini v1beta REST API base.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub upstream: UpstreamConfig,
    pub retry: RetryConfig,
    pub dedup: DedupConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0).
    pub bind: String,
    pub port: u16,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
        }
    }
}

/// Result cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached results (clamped to at least 1).
    pub max_entries: usize,
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Gemini endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub model: String,
    pub api_base: String,
    /// Per-attempt request timeout in seconds.
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_secs: 60,
            temperature: 0.3,
            max_output_tokens: 2048,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry/backoff settings for the upstream call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    /// Backoff base after a 429: waits are `2^n * base`.
    pub rate_limit_base_secs: u64,
    /// Backoff base after a transport timeout.
    pub timeout_base_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limit_base_secs: 5,
            timeout_base_secs: 2,
        }
    }
}

/// In-flight deduplication settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// How long a follower waits on a leader before proceeding on its own.
    pub wait_timeout_secs: u64,
    /// Delay between a leader's signal and removal of its marker.
    pub release_grace_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: 90,
            release_grace_ms: 100,
        }
    }
}

impl DedupConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn release_grace(&self) -> Duration {
        Duration::from_millis(self.release_grace_ms)
    }
}

impl Config {
    /// Default config file location: `~/.jd-decoder/config.json`.
    pub fn path() -> PathBuf {
        if let Ok(p) = std::env::var("JD_DECODER_CONFIG") {
            if !p.trim().is_empty() {
                return PathBuf::from(p);
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".jd-decoder")
            .join("config.json")
    }

    /// Load from the default path, apply env overrides and validate.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_path(&Self::path())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load a config file. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => {
                debug!(path = %path.display(), "Loading config file");
                serde_json::from_str(&data).map_err(|e| {
                    DecoderError::Config(format!("invalid config {}: {}", path.display(), e))
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(DecoderError::Config(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Apply `GEMINI_MODEL`, `GEMINI_API_BASE` and `JD_DECODER_*` overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override application against an arbitrary lookup, so tests don't touch
    /// the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(model) = get("GEMINI_MODEL") {
            self.upstream.model = model;
        }
        if let Some(base) = get("GEMINI_API_BASE") {
            self.upstream.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(bind) = get("JD_DECODER_BIND") {
            self.server.bind = bind;
        }
        if let Some(origins) = get("JD_DECODER_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        parse_into(get("JD_DECODER_PORT"), "JD_DECODER_PORT", &mut self.server.port);
        parse_into(
            get("JD_DECODER_CACHE_MAX_ENTRIES"),
            "JD_DECODER_CACHE_MAX_ENTRIES",
            &mut self.cache.max_entries,
        );
        parse_into(
            get("JD_DECODER_CACHE_TTL_SECS"),
            "JD_DECODER_CACHE_TTL_SECS",
            &mut self.cache.ttl_secs,
        );
        parse_into(
            get("JD_DECODER_TIMEOUT_SECS"),
            "JD_DECODER_TIMEOUT_SECS",
            &mut self.upstream.timeout_secs,
        );
        parse_into(
            get("JD_DECODER_MAX_RETRIES"),
            "JD_DECODER_MAX_RETRIES",
            &mut self.retry.max_retries,
        );
        parse_into(
            get("JD_DECODER_WAIT_TIMEOUT_SECS"),
            "JD_DECODER_WAIT_TIMEOUT_SECS",
            &mut self.dedup.wait_timeout_secs,
        );
    }

    /// Reject settings that would make the request path meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_retries == 0 {
            return Err(DecoderError::Config(
                "retry.max_retries must be at least 1".into(),
            ));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(DecoderError::Config(
                "upstream.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.upstream.model.trim().is_empty() {
            return Err(DecoderError::Config("upstream.model is empty".into()));
        }
        if self.dedup.wait_timeout_secs == 0 {
            return Err(DecoderError::Config(
                "dedup.wait_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_into<T: std::str::FromStr>(raw: Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = raw {
        match raw.parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => warn!("Ignoring invalid {} value '{}'", key, raw),
        }
    }
}
