//! Usage counters and liveness data for the decoder service.
//!
//! Provides:
//! - [`UsageMetrics`] for lock-free per-request counters
//! - [`start_periodic_usage_flush`] for periodic metric emission

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

const USAGE_FLUSH_INTERVAL_SECS: u64 = 60;

// ============================================================================
// UsageMetrics
// ============================================================================

/// Lock-free counters for the decode path.
#[derive(Debug)]
pub struct UsageMetrics {
    /// Total decode requests accepted (after input validation).
    pub requests: AtomicU64,
    /// Requests answered from the result cache.
    pub cache_hits: AtomicU64,
    /// Requests that waited on another request's in-flight call.
    pub dedup_waits: AtomicU64,
    /// Followers that gave up waiting and led their own attempt.
    pub dedup_takeovers: AtomicU64,
    /// Individual upstream HTTP attempts.
    pub upstream_attempts: AtomicU64,
    /// Backoff sleeps taken between attempts.
    pub upstream_retries: AtomicU64,
    /// Requests that ended in an error.
    pub errors: AtomicU64,
    /// Whether the service is ready to accept requests.
    pub ready: AtomicBool,
    started_at: Instant,
}

impl UsageMetrics {
    /// Create zeroed counters with `ready = false`.
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            dedup_waits: AtomicU64::new(0),
            dedup_takeovers: AtomicU64::new(0),
            upstream_attempts: AtomicU64::new(0),
            upstream_retries: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dedup_wait(&self) {
        self.dedup_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dedup_takeover(&self) {
        self.dedup_takeovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_attempt(&self) {
        self.upstream_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.upstream_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the ready flag.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            dedup_waits: self.dedup_waits.load(Ordering::Relaxed),
            dedup_takeovers: self.dedup_takeovers.load(Ordering::Relaxed),
            upstream_attempts: self.upstream_attempts.load(Ordering::Relaxed),
            upstream_retries: self.upstream_retries.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            uptime_secs: self.uptime().as_secs(),
        }
    }

    /// Emit current counters as a structured log line.
    pub fn emit_usage(&self, reason: &str) {
        let s = self.snapshot();
        info!(
            event = "usage_summary",
            reason = reason,
            requests = s.requests,
            cache_hits = s.cache_hits,
            dedup_waits = s.dedup_waits,
            dedup_takeovers = s.dedup_takeovers,
            upstream_attempts = s.upstream_attempts,
            upstream_retries = s.upstream_retries,
            errors = s.errors,
            "Usage metrics"
        );
    }
}

impl Default for UsageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable copy of [`UsageMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub dedup_waits: u64,
    pub dedup_takeovers: u64,
    pub upstream_attempts: u64,
    pub upstream_retries: u64,
    pub errors: u64,
    pub uptime_secs: u64,
}

// ============================================================================
// Periodic usage flush
// ============================================================================

/// Start a background task that emits usage metrics every 60 seconds.
///
/// Emits a final `shutdown` summary when `shutdown_rx` signals `true`.
pub fn start_periodic_usage_flush(
    metrics: Arc<UsageMetrics>,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(USAGE_FLUSH_INTERVAL_SECS));
        interval.tick().await; // skip first immediate tick

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics.emit_usage("periodic");
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        metrics.emit_usage("shutdown");
                        break;
                    }
                }
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
