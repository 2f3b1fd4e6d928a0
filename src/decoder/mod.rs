//! Request orchestration: cache, in-flight deduplication, upstream call.
//!
//! [`Decoder::decode`] runs one request through:
//!
//! 1. input validation
//! 2. result cache lookup
//! 3. leader election on the document fingerprint; followers wait for the
//!    leader, re-check the cache, and contend again if it is still empty
//! 4. prompt construction and the upstream call (with retry)
//! 5. answer extraction, parsing and normalization
//! 6. cache insert, then waking followers

pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cache::{Fingerprint, InFlightCoordinator, LeaderGuard, ResultCache, Role, WaitOutcome};
use crate::config::Config;
use crate::error::{DecoderError, Result};
use crate::extraction::{parse_answer, ExtractionResult};
use crate::health::UsageMetrics;
use crate::providers::gemini::{build_request_body, extract_text};
use crate::providers::{GeminiTransport, RetryPolicy, Sleeper, UpstreamClient, UpstreamTransport};

pub use prompt::build_prompt;

/// The decode service. Owns its cache, coordinator and upstream client; share
/// it behind an `Arc`.
#[derive(Debug)]
pub struct Decoder {
    cache: Arc<ResultCache>,
    coordinator: InFlightCoordinator,
    upstream: UpstreamClient,
    metrics: Arc<UsageMetrics>,
    temperature: f32,
    max_output_tokens: u32,
    wait_timeout: Duration,
}

impl Decoder {
    /// Build a decoder talking to Gemini as configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = GeminiTransport::from_config(&config.upstream)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Build a decoder over an arbitrary transport.
    pub fn new(transport: Arc<dyn UpstreamTransport>, config: &Config) -> Self {
        let metrics = Arc::new(UsageMetrics::new());
        let upstream = UpstreamClient::new(transport, RetryPolicy::from_config(&config.retry))
            .with_metrics(Arc::clone(&metrics));
        Self {
            cache: Arc::new(ResultCache::from_config(&config.cache)),
            coordinator: InFlightCoordinator::from_config(&config.dedup),
            upstream,
            metrics,
            temperature: config.upstream.temperature,
            max_output_tokens: config.upstream.max_output_tokens,
            wait_timeout: config.dedup.wait_timeout(),
        }
    }

    /// Replace the backoff sleeper of the upstream client.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.upstream = self.upstream.with_sleeper(sleeper);
        self
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn coordinator(&self) -> &InFlightCoordinator {
        &self.coordinator
    }

    pub fn metrics(&self) -> &Arc<UsageMetrics> {
        &self.metrics
    }

    pub fn model(&self) -> &str {
        self.upstream.model()
    }

    /// Decode a job description into an [`ExtractionResult`].
    ///
    /// The credential is passed through to the upstream untouched.
    pub async fn decode(&self, credential: &str, document: &str) -> Result<ExtractionResult> {
        let outcome = self.decode_inner(credential, document).await;
        if let Err(e) = &outcome {
            self.metrics.record_error();
            debug!(kind = e.kind(), "Decode failed");
        }
        outcome
    }

    async fn decode_inner(&self, credential: &str, document: &str) -> Result<ExtractionResult> {
        if credential.trim().is_empty() {
            return Err(DecoderError::InvalidInput("API key is required".into()));
        }
        if document.trim().is_empty() {
            return Err(DecoderError::InvalidInput(
                "Job description is required".into(),
            ));
        }
        self.metrics.record_request();

        let key = Fingerprint::of(document);
        if let Some(hit) = self.cached(&key) {
            info!(key = %key.short(), "Returning cached result");
            return Ok(hit);
        }

        let leader = match self.elect(&key).await {
            Ok(guard) => guard,
            Err(hit) => return Ok(hit),
        };

        let outcome = self.fetch(credential, document).await;
        if let Ok(result) = &outcome {
            self.cache.set_by_fingerprint(key.clone(), result.clone());
        }
        leader.signal_and_release();
        outcome
    }

    /// Become leader for `key`, or wait on the current leader.
    ///
    /// Returns `Err(result)` when a wait ended with the result in cache.
    async fn elect(&self, key: &Fingerprint) -> std::result::Result<LeaderGuard, ExtractionResult> {
        let mut role = self.coordinator.try_become_leader(key);
        loop {
            let marker = match role {
                Role::Leader(guard) => return Ok(guard),
                Role::Follower(marker) => marker,
            };

            info!(key = %key.short(), "Duplicate request detected, waiting for original");
            self.metrics.record_dedup_wait();
            let generation = marker.generation();
            let waited = marker.wait(self.wait_timeout).await;

            if let Some(hit) = self.cached(key) {
                return Err(hit);
            }
            role = match waited {
                // Leader failed without caching; contend for the next attempt.
                WaitOutcome::Completed => {
                    debug!(key = %key.short(), "Leader finished without a result");
                    self.coordinator.try_become_leader(key)
                }
                WaitOutcome::TimedOut => {
                    info!(
                        key = %key.short(),
                        timeout_secs = self.wait_timeout.as_secs(),
                        "Timed out waiting for in-flight request, proceeding independently"
                    );
                    let next = self.coordinator.take_over(key, generation);
                    if matches!(next, Role::Leader(_)) {
                        self.metrics.record_dedup_takeover();
                    }
                    next
                }
            };
        }
    }

    fn cached(&self, key: &Fingerprint) -> Option<ExtractionResult> {
        let hit = self.cache.get_by_fingerprint(key)?;
        self.metrics.record_cache_hit();
        Some(hit)
    }

    async fn fetch(&self, credential: &str, document: &str) -> Result<ExtractionResult> {
        let payload = build_request_body(
            &build_prompt(document),
            self.temperature,
            self.max_output_tokens,
        );
        let response = self.upstream.call(credential, &payload).await?;

        let text = extract_text(&response).ok_or_else(|| {
            error!("Unexpected Gemini response structure: {}", response);
            DecoderError::Extraction("Unexpected response from Gemini API".into())
        })?;

        let parsed = parse_answer(&text).map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            DecoderError::Extraction("Could not parse analysis results".into())
        })?;

        let result = ExtractionResult::from_value(&parsed);
        if result.is_empty() {
            warn!("Gemini answer carried no requirement fields");
        }
        Ok(result)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::providers::retry::tests::{RecordingSleeper, ScriptedTransport};
    use crate::providers::{RawReply, TransportError};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const DOC: &str = "Senior Go Engineer, 5 years, Kubernetes";
    const ANSWER: &str = r#"{"mustHave":["Go","Kubernetes"],"niceToHave":[],"keywords":["Go"],"insights":[]}"#;

    fn gemini_reply(answer: &str) -> RawReply {
        RawReply::new(
            200,
            json!({"candidates": [{"content": {"parts": [{"text": answer}]}}]}).to_string(),
        )
    }

    fn expected() -> ExtractionResult {
        ExtractionResult {
            must_have: vec!["Go".into(), "Kubernetes".into()],
            nice_to_have: vec![],
            keywords: vec!["Go".into()],
            insights: vec![],
        }
    }

    fn decoder_over(transport: Arc<dyn UpstreamTransport>) -> Decoder {
        Decoder::new(transport, &Config::default())
            .with_sleeper(Arc::new(RecordingSleeper::default()))
    }

    /// Transport whose replies each arrive after a scripted delay.
    struct DelayedTransport {
        script: Mutex<VecDeque<(Duration, RawReply)>>,
        calls: AtomicUsize,
    }

    impl DelayedTransport {
        fn new(script: Vec<(Duration, RawReply)>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamTransport for DelayedTransport {
        async fn send(
            &self,
            _credential: &str,
            _payload: &Value,
        ) -> std::result::Result<RawReply, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            let (delay, reply) = next.unwrap_or((Duration::ZERO, RawReply::new(500, "")));
            tokio::time::sleep(delay).await;
            Ok(reply)
        }

        fn model(&self) -> &str {
            "gemini-test"
        }
    }

    #[tokio::test]
    async fn test_end_to_end_then_cached() {
        let transport = ScriptedTransport::new(vec![Ok(gemini_reply(ANSWER))]);
        let decoder = decoder_over(transport.clone());

        let first = decoder.decode("valid-key", DOC).await.unwrap();
        assert_eq!(first, expected());

        let second = decoder.decode("valid-key", DOC).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(transport.calls(), 1, "second call served from cache");
        assert_eq!(decoder.metrics().snapshot().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_cache_ignores_case_and_whitespace() {
        let transport = ScriptedTransport::new(vec![Ok(gemini_reply(ANSWER))]);
        let decoder = decoder_over(transport.clone());

        decoder.decode("k", DOC).await.unwrap();
        let again = decoder
            .decode("k", &format!("  {}\n", DOC.to_uppercase()))
            .await
            .unwrap();
        assert_eq!(again, expected());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_inputs_are_rejected_without_upstream_call() {
        let transport = ScriptedTransport::new(vec![]);
        let decoder = decoder_over(transport.clone());

        let err = decoder.decode("  ", DOC).await.unwrap_err();
        assert_eq!(err, DecoderError::InvalidInput("API key is required".into()));
        let err = decoder.decode("key", "\n\t").await.unwrap_err();
        assert_eq!(
            err,
            DecoderError::InvalidInput("Job description is required".into())
        );
        assert_eq!(transport.calls(), 0);
        assert_eq!(decoder.metrics().snapshot().errors, 2);
    }

    #[tokio::test]
    async fn test_fenced_answer_is_parsed() {
        let fenced = format!("```json\n{ANSWER}\n```");
        let transport = ScriptedTransport::new(vec![Ok(gemini_reply(&fenced))]);
        let decoder = decoder_over(transport);
        assert_eq!(decoder.decode("k", DOC).await.unwrap(), expected());
    }

    #[tokio::test]
    async fn test_missing_candidates_is_extraction_error_and_not_cached() {
        let transport = ScriptedTransport::new(vec![
            Ok(RawReply::new(200, r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#)),
            Ok(gemini_reply(ANSWER)),
        ]);
        let decoder = decoder_over(transport.clone());

        let err = decoder.decode("k", DOC).await.unwrap_err();
        assert_eq!(
            err,
            DecoderError::Extraction("Unexpected response from Gemini API".into())
        );
        assert!(decoder.cache().is_empty());

        // Next request tries again.
        assert_eq!(decoder.decode("k", DOC).await.unwrap(), expected());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_answer_is_extraction_error() {
        let transport = ScriptedTransport::new(vec![Ok(gemini_reply("no json here"))]);
        let decoder = decoder_over(transport);
        let err = decoder.decode("k", DOC).await.unwrap_err();
        assert_eq!(
            err,
            DecoderError::Extraction("Could not parse analysis results".into())
        );
    }

    #[tokio::test]
    async fn test_answer_without_fields_yields_empty_result() {
        let transport = ScriptedTransport::new(vec![Ok(gemini_reply(r#"{"summary": "n/a"}"#))]);
        let decoder = decoder_over(transport.clone());

        let result = decoder.decode("k", DOC).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result, ExtractionResult::default());

        // An empty answer is still a valid answer and is cached.
        assert_eq!(decoder.decode("k", DOC).await.unwrap(), result);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_propagates_and_releases_marker() {
        let transport = ScriptedTransport::new(vec![Ok(RawReply::new(403, "{}"))]);
        let decoder = decoder_over(transport);
        let err = decoder.decode("k", DOC).await.unwrap_err();
        assert!(matches!(
            err,
            DecoderError::Upstream(UpstreamError::Forbidden(_))
        ));
        assert!(!decoder.coordinator().is_in_flight(&Fingerprint::of(DOC)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_requests_share_one_upstream_call() {
        let transport =
            DelayedTransport::new(vec![(Duration::from_secs(10), gemini_reply(ANSWER))]);
        let decoder = Arc::new(decoder_over(transport.clone()));

        let a = tokio::spawn({
            let d = Arc::clone(&decoder);
            async move { d.decode("key-a", DOC).await }
        });
        let b = tokio::spawn({
            let d = Arc::clone(&decoder);
            async move { d.decode("key-b", DOC).await }
        });

        let ra = a.await.unwrap().unwrap();
        let rb = b.await.unwrap().unwrap();
        assert_eq!(ra, expected());
        assert_eq!(ra, rb);
        assert_eq!(transport.calls(), 1);
        assert_eq!(decoder.metrics().snapshot().dedup_waits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_retries_after_leader_failure() {
        let transport = DelayedTransport::new(vec![
            (Duration::from_secs(1), RawReply::new(403, "{}")),
            (Duration::from_secs(1), gemini_reply(ANSWER)),
        ]);
        let decoder = Arc::new(decoder_over(transport.clone()));

        let leader = tokio::spawn({
            let d = Arc::clone(&decoder);
            async move { d.decode("forbidden-key", DOC).await }
        });
        tokio::task::yield_now().await;
        let follower = tokio::spawn({
            let d = Arc::clone(&decoder);
            async move { d.decode("good-key", DOC).await }
        });

        assert!(matches!(
            leader.await.unwrap(),
            Err(DecoderError::Upstream(UpstreamError::Forbidden(_)))
        ));
        assert_eq!(follower.await.unwrap().unwrap(), expected());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_proceeds_independently_after_wait_timeout() {
        let transport = DelayedTransport::new(vec![
            (Duration::from_secs(600), gemini_reply(ANSWER)),
            (Duration::from_secs(1), gemini_reply(ANSWER)),
        ]);
        let decoder = Arc::new(decoder_over(transport.clone()));

        let slow = tokio::spawn({
            let d = Arc::clone(&decoder);
            async move { d.decode("k", DOC).await }
        });
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        let impatient = decoder.decode("k", DOC).await.unwrap();
        assert_eq!(impatient, expected());
        assert!(started.elapsed() >= Duration::from_secs(90));
        assert!(started.elapsed() < Duration::from_secs(600));
        assert_eq!(transport.calls(), 2);
        assert_eq!(decoder.metrics().snapshot().dedup_takeovers, 1);

        assert_eq!(slow.await.unwrap().unwrap(), expected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_timed_out_followers_elect_one_replacement_leader() {
        let transport = DelayedTransport::new(vec![
            (Duration::from_secs(600), gemini_reply(ANSWER)),
            (Duration::from_secs(1), gemini_reply(ANSWER)),
        ]);
        let decoder = Arc::new(decoder_over(transport.clone()));

        let slow = tokio::spawn({
            let d = Arc::clone(&decoder);
            async move { d.decode("k", DOC).await }
        });
        tokio::task::yield_now().await;

        let followers: Vec<_> = (0..3)
            .map(|i| {
                let d = Arc::clone(&decoder);
                tokio::spawn(async move { d.decode(&format!("key-{i}"), DOC).await })
            })
            .collect();
        for follower in followers {
            assert_eq!(follower.await.unwrap().unwrap(), expected());
        }

        assert_eq!(transport.calls(), 2, "only one follower replaces the stuck leader");
        assert_eq!(decoder.metrics().snapshot().dedup_takeovers, 1);

        assert_eq!(slow.await.unwrap().unwrap(), expected());
    }
}
