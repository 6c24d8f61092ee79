//! Pathway: a named, health-tracked binding to one backend transport
//!
//! Carries the transport, its resilience stack, and the adaptive health and
//! weight state the router consults. Health mutations happen in short
//! lock-held sections after each outcome; the router drives them.

use crate::accounting::{SessionMetrics, UsageAccountant};
use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use crate::resilience::Resilience;
use crate::transport::ChatTransport;
use crate::types::RetryPolicy;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Weight bounds and update factors for the adaptive weight.
const WEIGHT_MIN: f64 = 0.1;
const WEIGHT_MAX: f64 = 2.0;
const WEIGHT_GROWTH: f64 = 1.05;
const WEIGHT_DECAY: f64 = 0.7;

/// Smoothing for the latency EMA: 0.8 old, 0.2 new.
const LATENCY_SMOOTHING: f64 = 0.8;

/// Rough capability class of the backend behind a pathway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Large hosted frontier models
    Frontier,
    /// Hosted mid-tier models
    Standard,
    /// Local or self-hosted deployments
    Local,
}

#[derive(Debug)]
struct PathwayHealth {
    total_attempts: u64,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
    last_activation: Option<DateTime<Utc>>,
    avg_latency: Option<Duration>,
    weight: f64,
}

impl Default for PathwayHealth {
    fn default() -> Self {
        Self {
            total_attempts: 0,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            last_activation: None,
            avg_latency: None,
            weight: 1.0,
        }
    }
}

/// Read-only view of one pathway's state.
#[derive(Debug, Clone)]
pub struct PathwaySnapshot {
    pub name: String,
    pub tier: Tier,
    pub enabled: bool,
    pub circuit: CircuitState,
    pub weight: f64,
    pub total_attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_activation: Option<DateTime<Utc>>,
    pub avg_latency: Option<Duration>,
    pub metrics: SessionMetrics,
}

/// A named backend binding: transport, resilience policy, health state.
pub struct Pathway {
    name: String,
    transport: Arc<dyn ChatTransport>,
    tier: Tier,
    tags: HashSet<String>,
    enabled: bool,
    resilience: Resilience,
    accountant: UsageAccountant,
    health: Mutex<PathwayHealth>,
}

impl Pathway {
    pub fn builder(name: impl Into<String>, transport: Arc<dyn ChatTransport>) -> PathwayBuilder {
        PathwayBuilder::new(name, transport)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &Arc<dyn ChatTransport> {
        &self.transport
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Healthy iff the circuit breaker is not open.
    pub fn is_healthy(&self) -> bool {
        self.resilience.breaker().state() != CircuitState::Open
    }

    pub fn resilience(&self) -> &Resilience {
        &self.resilience
    }

    pub fn accountant(&self) -> &UsageAccountant {
        &self.accountant
    }

    pub fn weight(&self) -> f64 {
        self.health.lock().weight
    }

    /// Book a successful call: counters, weight growth, latency EMA.
    pub fn record_success(&self, latency: Duration) {
        let mut health = self.health.lock();
        health.total_attempts += 1;
        health.successes += 1;
        health.consecutive_failures = 0;
        health.last_activation = Some(Utc::now());
        health.weight = (health.weight * WEIGHT_GROWTH).min(WEIGHT_MAX);
        health.avg_latency = Some(match health.avg_latency {
            Some(avg) => {
                let smoothed = avg.as_secs_f64() * LATENCY_SMOOTHING
                    + latency.as_secs_f64() * (1.0 - LATENCY_SMOOTHING);
                Duration::from_secs_f64(smoothed)
            }
            None => latency,
        });
    }

    /// Book a failed call: counters, streak, weight decay.
    pub fn record_failure(&self) {
        let mut health = self.health.lock();
        health.total_attempts += 1;
        health.failures += 1;
        health.consecutive_failures += 1;
        health.weight = (health.weight * WEIGHT_DECAY).max(WEIGHT_MIN);
    }

    pub fn snapshot(&self) -> PathwaySnapshot {
        let health = self.health.lock();
        PathwaySnapshot {
            name: self.name.clone(),
            tier: self.tier,
            enabled: self.enabled,
            circuit: self.resilience.breaker().state(),
            weight: health.weight,
            total_attempts: health.total_attempts,
            successes: health.successes,
            failures: health.failures,
            consecutive_failures: health.consecutive_failures,
            last_activation: health.last_activation,
            avg_latency: health.avg_latency,
            metrics: self.accountant.session_metrics(),
        }
    }
}

/// Builder for a [`Pathway`].
pub struct PathwayBuilder {
    name: String,
    transport: Arc<dyn ChatTransport>,
    tier: Tier,
    tags: HashSet<String>,
    enabled: bool,
    retry: RetryPolicy,
    breaker: BreakerConfig,
    budget: Option<Duration>,
    limiter: Option<Arc<tokio::sync::Semaphore>>,
    initial_weight: f64,
}

impl PathwayBuilder {
    pub fn new(name: impl Into<String>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
            tier: Tier::Standard,
            tags: HashSet::new(),
            enabled: true,
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            budget: None,
            limiter: None,
            initial_weight: 1.0,
        }
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I: IntoIterator<Item = String>>(mut self, tags: I) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn breaker(mut self, config: BreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    pub fn budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn limiter(mut self, limiter: Arc<tokio::sync::Semaphore>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Starting adaptive weight, clamped into the weight bounds. Configured
    /// static weights map here.
    pub fn initial_weight(mut self, weight: f64) -> Self {
        self.initial_weight = weight.clamp(WEIGHT_MIN, WEIGHT_MAX);
        self
    }

    pub fn build(self) -> Pathway {
        let breaker = Arc::new(CircuitBreaker::new(self.name.clone(), self.breaker));
        let mut resilience = Resilience::new(self.retry, breaker);
        if let Some(budget) = self.budget {
            resilience = resilience.with_budget(budget);
        }
        if let Some(limiter) = self.limiter {
            resilience = resilience.with_limiter(limiter);
        }
        let model = self.transport.model().to_string();
        let accountant = UsageAccountant::new(self.name.clone(), model);
        Pathway {
            name: self.name,
            transport: self.transport,
            tier: self.tier,
            tags: self.tags,
            enabled: self.enabled,
            resilience,
            accountant,
            health: Mutex::new(PathwayHealth {
                weight: self.initial_weight,
                ..Default::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::mock::MockTransport;

    fn pathway() -> Pathway {
        Pathway::builder("test", Arc::new(MockTransport::always_ok("hi"))).build()
    }

    #[test]
    fn weight_grows_toward_but_never_past_two() {
        let p = pathway();
        for _ in 0..200 {
            p.record_success(Duration::from_millis(100));
        }
        let w = p.weight();
        assert!(w <= WEIGHT_MAX);
        assert!(w > 1.9);
    }

    #[test]
    fn weight_decays_toward_but_never_below_floor() {
        let p = pathway();
        for _ in 0..200 {
            p.record_failure();
        }
        let w = p.weight();
        assert!(w >= WEIGHT_MIN);
        assert!(w < 0.15);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let p = pathway();
        p.record_failure();
        p.record_failure();
        p.record_success(Duration::from_millis(50));
        let snap = p.snapshot();
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.failures, 2);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.total_attempts, 3);
    }

    #[test]
    fn latency_ema_blends_old_and_new() {
        let p = pathway();
        p.record_success(Duration::from_millis(100));
        p.record_success(Duration::from_millis(200));
        // 100 * 0.8 + 200 * 0.2 = 120
        let avg = p.snapshot().avg_latency.unwrap();
        assert!((avg.as_millis() as i64 - 120).abs() <= 1);
    }

    #[test]
    fn new_pathway_is_healthy_with_unit_weight() {
        let p = pathway();
        assert!(p.is_healthy());
        assert_eq!(p.weight(), 1.0);
        assert!(p.snapshot().last_activation.is_none());
    }
}
