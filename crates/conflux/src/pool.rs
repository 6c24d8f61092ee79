//! Provider pool / router
//!
//! Holds the ordered pathway collection and owns the cross-pathway retry
//! loop: weighted round-robin selection with skip-and-wrap, an exclusion set
//! of already-tried pathways, degraded-sentinel sniffing, and the aggregate
//! accountant fold. Selection and bookkeeping are short lock-held sections;
//! network calls happen outside any lock.

use crate::accounting::{SessionMetrics, UsageAccountant};
use crate::breaker::BreakerConfig;
use crate::config::{BackendKind, ConfigError, PoolConfig};
use crate::extractor::ReasoningExtractor;
use crate::pathway::{Pathway, PathwaySnapshot};
use crate::transport::RawStream;
use crate::transports::{OllamaConfig, OllamaTransport, OpenAiCompatConfig, OpenAiCompatTransport};
use crate::types::*;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Finite, non-restartable sequence of mode-tagged fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = TransportResult<StreamFragment>> + Send>>;

/// Terminal outcome of one logical pool call.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The caller aborted; never counted against any pathway's health.
    #[error("request cancelled by caller")]
    Cancelled,
    /// Every eligible pathway was tried and failed.
    #[error("all {attempts} pathway attempts failed: {last_error}")]
    AggregateFailure {
        attempts: u32,
        #[source]
        last_error: TransportError,
    },
}

/// A completed generation, attributed to the pathway that produced it.
#[derive(Debug, Clone)]
pub struct PoolResponse {
    pub pathway: String,
    pub model: String,
    pub content: String,
    pub reasoning: Option<String>,
    pub usage: Option<TokenUsage>,
    pub latency: Duration,
}

/// The router: an ordered pathway collection with a selection cursor.
pub struct ProviderPool {
    pathways: Vec<Arc<Pathway>>,
    cursor: Mutex<usize>,
    max_pathway_retries: usize,
    failover_enabled: bool,
    degraded_sentinel: Option<String>,
    aggregate: Arc<UsageAccountant>,
}

impl ProviderPool {
    pub fn builder() -> PoolBuilder {
        PoolBuilder::default()
    }

    /// Build a pool from configuration, wiring transports per backend kind.
    /// The aggregate accountant is injected by the caller; there is no
    /// process-wide singleton.
    pub fn from_config(
        config: &PoolConfig,
        aggregate: Arc<UsageAccountant>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let breaker = BreakerConfig::default()
            .with_failure_threshold(config.breaker_failure_threshold)
            .with_break_duration(Duration::from_secs(config.breaker_break_secs));
        let limiter = config
            .shared_concurrency
            .map(|cap| Arc::new(tokio::sync::Semaphore::new(cap.max(1))));

        let mut builder = Self::builder()
            .max_pathway_retries(config.max_pathway_retries)
            .failover_enabled(config.failover_enabled)
            .aggregate(aggregate);
        if let Some(sentinel) = &config.degraded_sentinel {
            builder = builder.degraded_sentinel(sentinel.clone());
        }

        for provider in &config.providers {
            let transport: Arc<dyn crate::transport::ChatTransport> = match provider.backend {
                BackendKind::OpenaiCompat => {
                    let mut cfg = OpenAiCompatConfig::new(
                        provider.credential.clone().unwrap_or_default(),
                    );
                    if let Some(endpoint) = &provider.endpoint {
                        cfg = cfg.with_base_url(endpoint);
                    }
                    if let Some(model) = &provider.model {
                        cfg = cfg.with_model(model);
                    }
                    cfg = cfg.with_timeout(config.request_timeout_secs);
                    Arc::new(OpenAiCompatTransport::with_config(cfg))
                }
                BackendKind::Ollama => {
                    let mut cfg = OllamaConfig::default();
                    if let Some(endpoint) = &provider.endpoint {
                        cfg = cfg.with_base_url(endpoint);
                    }
                    if let Some(model) = &provider.model {
                        cfg = cfg.with_model(model);
                    }
                    if let Some(credential) = &provider.credential {
                        cfg = cfg.with_credential(credential);
                    }
                    cfg = cfg.with_timeout(config.request_timeout_secs);
                    Arc::new(OllamaTransport::with_config(cfg))
                }
            };

            // local backends see more variance; give them the longer leash
            let default_attempts = match provider.backend {
                BackendKind::Ollama => 5,
                BackendKind::OpenaiCompat => 3,
            };
            let retry = RetryPolicy::default()
                .with_max_attempts(provider.max_attempts.unwrap_or(default_attempts));

            let mut pathway = Pathway::builder(provider.name.clone(), transport)
                .tier(provider.effective_tier())
                .tags(provider.tags.iter().cloned())
                .enabled(provider.enabled)
                .retry(retry)
                .breaker(breaker.clone())
                .budget(Duration::from_secs(config.request_timeout_secs))
                .initial_weight(f64::from(provider.weight));
            if let Some(limiter) = &limiter {
                pathway = pathway.limiter(limiter.clone());
            }
            builder = builder.pathway(pathway.build());
        }

        Ok(builder.build())
    }

    pub fn pathways(&self) -> &[Arc<Pathway>] {
        &self.pathways
    }

    /// Per-pathway health/weight/metrics view; never blocks in-flight calls.
    pub fn snapshots(&self) -> Vec<PathwaySnapshot> {
        self.pathways.iter().map(|p| p.snapshot()).collect()
    }

    /// Aggregate metrics across every pathway's completed requests.
    pub fn aggregate_metrics(&self) -> SessionMetrics {
        self.aggregate.session_metrics()
    }

    pub fn aggregate_accountant(&self) -> &Arc<UsageAccountant> {
        &self.aggregate
    }

    /// Weighted round-robin selection with skip-and-wrap.
    ///
    /// Scans forward from the cursor at most `len` steps, skipping disabled
    /// pathways, unhealthy ones while failover is enabled, and anything in
    /// the exclusion set. When the scan comes up empty, falls back to the
    /// first enabled not-yet-excluded pathway ignoring health, so a fully
    /// degraded pool still answers. Advances the cursor past the choice.
    fn select_pathway(&self, excluded: &HashSet<usize>) -> Option<(usize, Arc<Pathway>)> {
        let len = self.pathways.len();
        if len == 0 {
            return None;
        }
        let mut cursor = self.cursor.lock();

        for step in 0..len {
            let idx = (*cursor + step) % len;
            let pathway = &self.pathways[idx];
            if !pathway.is_enabled() || excluded.contains(&idx) {
                continue;
            }
            if self.failover_enabled && !pathway.is_healthy() {
                continue;
            }
            *cursor = (idx + 1) % len;
            return Some((idx, pathway.clone()));
        }

        // fully degraded: ignore health, keep answering
        for idx in 0..len {
            let pathway = &self.pathways[idx];
            if pathway.is_enabled() && !excluded.contains(&idx) {
                debug!(pathway = %pathway.name(), "pool degraded, selecting unhealthy pathway");
                *cursor = (idx + 1) % len;
                return Some((idx, pathway.clone()));
            }
        }

        None
    }

    /// Whether a successful response is actually a degraded placeholder.
    fn is_degraded(&self, content: &str) -> bool {
        match &self.degraded_sentinel {
            Some(sentinel) => content.contains(sentinel),
            None => false,
        }
    }

    /// Generate a completion, failing over across pathways.
    pub async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<PoolResponse, PoolError> {
        let mut excluded: HashSet<usize> = HashSet::new();
        let mut last_error: Option<TransportError> = None;
        let mut attempts: u32 = 0;

        while (attempts as usize) < self.max_pathway_retries {
            let Some((idx, pathway)) = self.select_pathway(&excluded) else {
                break;
            };
            attempts += 1;

            let timer = pathway.accountant().start_request();
            let transport = pathway.transport().clone();
            let result = pathway
                .resilience()
                .execute(cancel, || transport.generate_with_reasoning(prompt))
                .await;

            match result {
                Ok(response) if self.is_degraded(&response.content) => {
                    warn!(
                        pathway = %pathway.name(),
                        "response matched degraded sentinel, treating as failure"
                    );
                    pathway.record_failure();
                    last_error = Some(TransportError::Other(format!(
                        "degraded placeholder response from '{}'",
                        pathway.name()
                    )));
                    excluded.insert(idx);
                }
                Ok(response) => {
                    let latency = timer.elapsed();
                    pathway.record_success(latency);
                    let usage = response.usage.unwrap_or_default();
                    let model = pathway.transport().model().to_string();
                    let metrics = pathway.accountant().end_request(timer, &model, usage);
                    self.aggregate.record(metrics);
                    if attempts > 1 {
                        info!(
                            pathway = %pathway.name(),
                            attempts,
                            "generation succeeded after failover"
                        );
                    }
                    return Ok(PoolResponse {
                        pathway: pathway.name().to_string(),
                        model,
                        content: response.content,
                        reasoning: response.reasoning,
                        usage: response.usage,
                        latency,
                    });
                }
                Err(TransportError::Cancelled) => return Err(PoolError::Cancelled),
                Err(error @ TransportError::CircuitOpen(_)) => {
                    // no transport call happened; skip without booking a failure
                    debug!(pathway = %pathway.name(), "circuit open, trying next pathway");
                    last_error = Some(error);
                    excluded.insert(idx);
                }
                Err(error) => {
                    warn!(pathway = %pathway.name(), %error, "pathway failed, trying next");
                    pathway.record_failure();
                    last_error = Some(error);
                    excluded.insert(idx);
                }
            }
        }

        Err(PoolError::AggregateFailure {
            attempts,
            last_error: last_error
                .unwrap_or_else(|| TransportError::ConfigError("no enabled pathways".to_string())),
        })
    }

    /// Stream a completion through the reasoning extractor.
    ///
    /// One pathway serves the whole stream; the pool falls back to another
    /// pathway only when the chosen one's raw sequence completes with zero
    /// fragments. Fragments already delivered are never retracted.
    pub async fn stream(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<FragmentStream, PoolError> {
        let mut excluded: HashSet<usize> = HashSet::new();
        let mut last_error: Option<TransportError> = None;
        let mut attempts: u32 = 0;

        while (attempts as usize) < self.max_pathway_retries {
            let Some((idx, pathway)) = self.select_pathway(&excluded) else {
                break;
            };
            attempts += 1;

            let timer = pathway.accountant().start_request();
            let transport = pathway.transport().clone();
            let acquired = pathway
                .resilience()
                .execute(cancel, || transport.stream_with_reasoning(prompt))
                .await;

            let mut raw = match acquired {
                Ok(stream) => stream,
                Err(TransportError::Cancelled) => return Err(PoolError::Cancelled),
                Err(error @ TransportError::CircuitOpen(_)) => {
                    last_error = Some(error);
                    excluded.insert(idx);
                    continue;
                }
                Err(error) => {
                    warn!(pathway = %pathway.name(), %error, "stream setup failed, trying next");
                    pathway.record_failure();
                    last_error = Some(error);
                    excluded.insert(idx);
                    continue;
                }
            };

            // probe for the first raw fragment: a stream that ends (or dies)
            // before producing anything is a total failure and fails over
            let first = tokio::select! {
                _ = cancel.cancelled() => return Err(PoolError::Cancelled),
                fragment = raw.next() => fragment,
            };

            match first {
                None => {
                    warn!(
                        pathway = %pathway.name(),
                        "stream completed with zero fragments, trying next pathway"
                    );
                    pathway.record_failure();
                    last_error = Some(TransportError::Other(format!(
                        "empty stream from '{}'",
                        pathway.name()
                    )));
                    excluded.insert(idx);
                }
                Some(Err(error)) => {
                    warn!(pathway = %pathway.name(), %error, "stream died before first fragment");
                    pathway.record_failure();
                    last_error = Some(error);
                    excluded.insert(idx);
                }
                Some(Ok(fragment)) => {
                    pathway.record_success(timer.elapsed());
                    debug!(pathway = %pathway.name(), "stream established");
                    return Ok(classified_stream(raw, fragment, cancel.clone()));
                }
            }
        }

        Err(PoolError::AggregateFailure {
            attempts,
            last_error: last_error
                .unwrap_or_else(|| TransportError::ConfigError("no enabled pathways".to_string())),
        })
    }
}

struct StreamState {
    raw: RawStream,
    extractor: ReasoningExtractor,
    pending: VecDeque<StreamFragment>,
    pending_error: Option<TransportError>,
    done: bool,
    cancel: CancellationToken,
}

/// Pull-based classification of a raw fragment stream. Cancellation is
/// checked at every production step; on upstream completion the extractor's
/// residual buffer is flushed in the mode then in force.
fn classified_stream(
    raw: RawStream,
    first_fragment: String,
    cancel: CancellationToken,
) -> FragmentStream {
    let mut extractor = ReasoningExtractor::new();
    let pending: VecDeque<StreamFragment> = extractor.push(&first_fragment).into();
    let state = StreamState {
        raw,
        extractor,
        pending,
        pending_error: None,
        done: false,
        cancel,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.pending.pop_front() {
                return Some((Ok(fragment), st));
            }
            if st.done {
                // classified text drains before a terminal error surfaces
                return st.pending_error.take().map(|e| (Err(e), st));
            }
            if st.cancel.is_cancelled() {
                st.done = true;
                return Some((Err(TransportError::Cancelled), st));
            }

            let next = tokio::select! {
                _ = st.cancel.cancelled() => {
                    st.done = true;
                    return Some((Err(TransportError::Cancelled), st));
                }
                item = st.raw.next() => item,
            };

            match next {
                Some(Ok(text)) => {
                    for fragment in st.extractor.push(&text) {
                        st.pending.push_back(fragment);
                    }
                }
                Some(Err(error)) => {
                    st.done = true;
                    if let Some(fragment) = st.extractor.finish() {
                        st.pending.push_back(fragment);
                    }
                    st.pending_error = Some(error);
                }
                None => {
                    st.done = true;
                    if let Some(fragment) = st.extractor.finish() {
                        st.pending.push_back(fragment);
                    }
                }
            }
        }
    }))
}

/// Builder for a [`ProviderPool`].
pub struct PoolBuilder {
    pathways: Vec<Arc<Pathway>>,
    max_pathway_retries: usize,
    failover_enabled: bool,
    degraded_sentinel: Option<String>,
    aggregate: Option<Arc<UsageAccountant>>,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self {
            pathways: Vec::new(),
            max_pathway_retries: 3,
            failover_enabled: true,
            degraded_sentinel: None,
            aggregate: None,
        }
    }
}

impl PoolBuilder {
    pub fn pathway(mut self, pathway: Pathway) -> Self {
        self.pathways.push(Arc::new(pathway));
        self
    }

    pub fn max_pathway_retries(mut self, retries: usize) -> Self {
        self.max_pathway_retries = retries.max(1);
        self
    }

    pub fn failover_enabled(mut self, enabled: bool) -> Self {
        self.failover_enabled = enabled;
        self
    }

    pub fn degraded_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.degraded_sentinel = Some(sentinel.into());
        self
    }

    /// Inject the aggregate accountant every completed request folds into.
    pub fn aggregate(mut self, aggregate: Arc<UsageAccountant>) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    pub fn build(self) -> ProviderPool {
        ProviderPool {
            pathways: self.pathways,
            cursor: Mutex::new(0),
            max_pathway_retries: self.max_pathway_retries,
            failover_enabled: self.failover_enabled,
            degraded_sentinel: self.degraded_sentinel,
            aggregate: self
                .aggregate
                .unwrap_or_else(|| Arc::new(UsageAccountant::aggregate())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::MockTransport;

    fn pool_of(transports: Vec<Arc<MockTransport>>) -> ProviderPool {
        let mut builder = ProviderPool::builder().max_pathway_retries(transports.len().max(1));
        for (i, t) in transports.into_iter().enumerate() {
            builder = builder.pathway(
                Pathway::builder(format!("p{}", i + 1), t)
                    .retry(RetryPolicy::no_retry())
                    .build(),
            );
        }
        builder.build()
    }

    #[tokio::test]
    async fn single_pathway_round_trip() {
        let t = Arc::new(MockTransport::always_ok("hello"));
        let pool = pool_of(vec![t.clone()]);
        let cancel = CancellationToken::new();

        let response = pool.generate("hi", &cancel).await.unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(response.pathway, "p1");
        assert_eq!(t.calls(), 1);
    }

    #[tokio::test]
    async fn inline_reasoning_is_split_out() {
        let t = Arc::new(MockTransport::always_ok("<think>count letters</think>three"));
        let pool = pool_of(vec![t]);
        let cancel = CancellationToken::new();

        let response = pool.generate("hi", &cancel).await.unwrap();
        assert_eq!(response.content, "three");
        assert_eq!(response.reasoning.as_deref(), Some("count letters"));
    }

    #[tokio::test]
    async fn disabled_pathway_is_never_selected() {
        let enabled = Arc::new(MockTransport::always_ok("from enabled"));
        let disabled = Arc::new(MockTransport::always_ok("from disabled"));
        let pool = ProviderPool::builder()
            .pathway(
                Pathway::builder("off", disabled.clone())
                    .enabled(false)
                    .build(),
            )
            .pathway(Pathway::builder("on", enabled.clone()).build())
            .build();
        let cancel = CancellationToken::new();

        for _ in 0..4 {
            let r = pool.generate("hi", &cancel).await.unwrap();
            assert_eq!(r.pathway, "on");
        }
        assert_eq!(disabled.calls(), 0);
    }

    #[tokio::test]
    async fn sentinel_response_fails_over() {
        let degraded = Arc::new(MockTransport::always_ok(
            "[FALLBACK] model unavailable, canned answer",
        ));
        let good = Arc::new(MockTransport::always_ok("real answer"));
        let pool = ProviderPool::builder()
            .pathway(
                Pathway::builder("degraded", degraded.clone())
                    .retry(RetryPolicy::no_retry())
                    .build(),
            )
            .pathway(
                Pathway::builder("good", good.clone())
                    .retry(RetryPolicy::no_retry())
                    .build(),
            )
            .degraded_sentinel("[FALLBACK]")
            .build();
        let cancel = CancellationToken::new();

        let response = pool.generate("hi", &cancel).await.unwrap();
        assert_eq!(response.content, "real answer");
        assert_eq!(pool.snapshots()[0].failures, 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts_and_last_cause() {
        let a = Arc::new(MockTransport::always_err(TransportError::NetworkError(
            "a down".into(),
        )));
        let b = Arc::new(MockTransport::always_err(TransportError::NetworkError(
            "b down".into(),
        )));
        let pool = pool_of(vec![a, b]);
        let cancel = CancellationToken::new();

        let error = pool.generate("hi", &cancel).await.unwrap_err();
        match error {
            PoolError::AggregateFailure {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error, TransportError::NetworkError("b down".into()));
            }
            other => panic!("expected AggregateFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn aggregate_accountant_sees_every_request() {
        let aggregate = Arc::new(UsageAccountant::aggregate());
        let pool = ProviderPool::builder()
            .pathway(Pathway::builder("p1", Arc::new(MockTransport::always_ok("x"))).build())
            .aggregate(aggregate.clone())
            .build();
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            pool.generate("hi", &cancel).await.unwrap();
        }
        assert_eq!(aggregate.session_metrics().total_requests, 3);
        assert_eq!(pool.aggregate_metrics().total_requests, 3);
    }
}
