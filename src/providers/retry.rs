//! Retry/backoff state machine for the upstream call.
//!
//! Each attempt's raw result is [`classify`]-ed into an [`AttemptOutcome`],
//! and [`RetryState::step`] turns that into the next [`Step`]:
//!
//! | outcome              | step                                         |
//! |----------------------|----------------------------------------------|
//! | 2xx                  | `Success`                                    |
//! | 429                  | `Retry` after `2^n * rate_limit_base`        |
//! | transport timeout    | `Retry` after `2^n * timeout_base`           |
//! | connection error     | `TerminalFailure`                            |
//! | 400 / 403 / 404      | `TerminalFailure` with a per-status error    |
//! | other non-2xx        | `TerminalFailure` with the status            |
//!
//! A retryable failure on the last attempt still waits its backoff, then
//! becomes `RetriesExhausted` carrying the last retryable error. With the
//! defaults, three 429s wait 5 s, 10 s and 20 s. Sleeping goes through
//! [`Sleeper`] so the schedule is observable in tests without wall-clock delay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{error_detail, RawReply, TransportError, UpstreamTransport};
use crate::config::RetryConfig;
use crate::error::{DecoderError, Result, UpstreamError};
use crate::health::UsageMetrics;

/// Largest exponent applied to a backoff base.
const MAX_BACKOFF_EXPONENT: u32 = 16;

// ── Policy ───────────────────────────────────────────────────────────────────

/// Attempt budget and backoff bases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    pub rate_limit_base: Duration,
    pub timeout_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            rate_limit_base: Duration::from_secs(config.rate_limit_base_secs),
            timeout_base: Duration::from_secs(config.timeout_base_secs),
        }
    }

    /// Wait after a 429 on attempt `n` (0-based).
    pub fn rate_limit_delay(&self, attempt: u32) -> Duration {
        scaled(self.rate_limit_base, attempt)
    }

    /// Wait after a transport timeout on attempt `n` (0-based).
    pub fn timeout_delay(&self, attempt: u32) -> Duration {
        scaled(self.timeout_base, attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

fn scaled(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(MAX_BACKOFF_EXPONENT))
}

// ── Classification ───────────────────────────────────────────────────────────

/// Classified result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 2xx; carries the response body.
    Success(String),
    /// 429; carries the upstream detail.
    RateLimited(String),
    /// Transport timeout; carries the transport detail.
    TimedOut(String),
    /// Anything that must not be retried.
    Terminal(UpstreamError),
}

/// Map one transport result to an [`AttemptOutcome`].
pub fn classify(
    result: std::result::Result<RawReply, TransportError>,
    model: &str,
) -> AttemptOutcome {
    let reply = match result {
        Ok(reply) => reply,
        Err(TransportError::Timeout(detail)) => return AttemptOutcome::TimedOut(detail),
        Err(TransportError::Connect(detail)) => {
            return AttemptOutcome::Terminal(UpstreamError::Connect(detail))
        }
    };

    if reply.is_success() {
        return AttemptOutcome::Success(reply.body);
    }

    let detail = error_detail(&reply.body);
    match reply.status {
        429 => AttemptOutcome::RateLimited(detail),
        400 => AttemptOutcome::Terminal(UpstreamError::BadRequest(detail)),
        403 => AttemptOutcome::Terminal(UpstreamError::Forbidden(detail)),
        404 => AttemptOutcome::Terminal(UpstreamError::NotFound {
            model: model.to_string(),
        }),
        status => AttemptOutcome::Terminal(UpstreamError::Status { status, detail }),
    }
}

// ── State machine ────────────────────────────────────────────────────────────

/// Transition produced by [`RetryState::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Success(String),
    /// Sleep for `delay`, then run attempt `next_attempt`.
    Retry { next_attempt: u32, delay: Duration },
    TerminalFailure(UpstreamError),
    /// Sleep for `delay`, then fail with `error`.
    RetriesExhausted { delay: Duration, error: UpstreamError },
}

/// Attempt counter plus the last retryable error.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
    last_error: Option<UpstreamError>,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            last_error: None,
        }
    }

    /// Current 0-based attempt index.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.policy.max_retries
    }

    /// Advance on the outcome of the current attempt.
    pub fn step(&mut self, outcome: AttemptOutcome) -> Step {
        match outcome {
            AttemptOutcome::Success(body) => Step::Success(body),
            AttemptOutcome::Terminal(err) => {
                debug_assert!(!err.is_retryable(), "terminal outcome must not be retryable");
                Step::TerminalFailure(err)
            }
            AttemptOutcome::RateLimited(detail) => {
                let delay = self.policy.rate_limit_delay(self.attempt);
                let err = UpstreamError::RateLimited(format!(
                    "Gemini API rate limit exceeded after {} attempt(s). Please wait a minute and try again. ({})",
                    self.attempt + 1,
                    detail
                ));
                self.backoff(delay, err)
            }
            AttemptOutcome::TimedOut(detail) => {
                let delay = self.policy.timeout_delay(self.attempt);
                let err = UpstreamError::Timeout(format!(
                    "Request timed out after {} attempt(s) ({})",
                    self.attempt + 1,
                    detail
                ));
                self.backoff(delay, err)
            }
        }
    }

    /// Error to surface once the budget is spent.
    pub fn into_exhausted_error(self) -> UpstreamError {
        self.last_error.unwrap_or_else(|| {
            UpstreamError::RateLimited(
                "Gemini API rate limit exceeded after retries. Please wait a minute and try again."
                    .to_string(),
            )
        })
    }

    fn backoff(&mut self, delay: Duration, err: UpstreamError) -> Step {
        self.last_error = Some(err);
        let next_attempt = self.attempt + 1;
        if next_attempt >= self.policy.max_retries {
            self.attempt = next_attempt;
            return Step::RetriesExhausted {
                delay,
                error: self.clone().into_exhausted_error(),
            };
        }
        self.attempt = next_attempt;
        Step::Retry {
            next_attempt,
            delay,
        }
    }
}

// ── Sleeping ─────────────────────────────────────────────────────────────────

/// Backoff sleep abstraction.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeping on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Upstream caller with bounded exponential-backoff retry.
pub struct UpstreamClient {
    transport: Arc<dyn UpstreamTransport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    metrics: Arc<UsageMetrics>,
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("model", &self.transport.model())
            .field("policy", &self.policy)
            .finish()
    }
}

impl UpstreamClient {
    pub fn new(transport: Arc<dyn UpstreamTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            sleeper: Arc::new(TokioSleeper),
            policy,
            metrics: Arc::new(UsageMetrics::new()),
        }
    }

    /// Replace the backoff sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Record attempts and retries into shared counters.
    pub fn with_metrics(mut self, metrics: Arc<UsageMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn model(&self) -> &str {
        self.transport.model()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call the upstream, retrying rate limits and timeouts within budget.
    ///
    /// Returns the parsed JSON body of the first successful reply.
    pub async fn call(&self, credential: &str, payload: &Value) -> Result<Value> {
        let mut state = RetryState::new(self.policy.clone());
        let max = self.policy.max_retries;

        while state.has_attempts_left() {
            let attempt = state.attempt();
            self.metrics.record_upstream_attempt();
            debug!(model = self.model(), attempt = attempt + 1, max, "Calling upstream");

            let result = self.transport.send(credential, payload).await;
            match state.step(classify(result, self.model())) {
                Step::Success(body) => {
                    return serde_json::from_str(&body).map_err(|e| {
                        DecoderError::Extraction(format!(
                            "Unexpected response from Gemini API: {e}"
                        ))
                    });
                }
                Step::Retry { next_attempt, delay } => {
                    warn!(
                        attempt = attempt + 1,
                        max,
                        wait_secs = delay.as_secs_f64(),
                        "Upstream busy or timed out, backing off"
                    );
                    self.metrics.record_retry();
                    self.sleeper.sleep(delay).await;
                    debug!(next_attempt = next_attempt + 1, "Retrying upstream call");
                }
                Step::TerminalFailure(err) => {
                    error!(kind = err.kind(), "Upstream call failed: {}", err);
                    return Err(err.into());
                }
                Step::RetriesExhausted { delay, error } => {
                    warn!(
                        attempt = attempt + 1,
                        max,
                        wait_secs = delay.as_secs_f64(),
                        "Upstream busy or timed out on final attempt, backing off"
                    );
                    self.sleeper.sleep(delay).await;
                    error!(kind = error.kind(), max, "Upstream retries exhausted: {}", error);
                    return Err(error.into());
                }
            }
        }

        Err(state.into_exhausted_error().into())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
