//! Usage accounting
//!
//! Records latency, token, and cost figures per completed request and keeps
//! running aggregates per accountant scope. Costs are computed in exact
//! decimal arithmetic so long sessions never accumulate float rounding error.

use crate::types::TokenUsage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Most recent requests retained for inspection. Running totals are
/// authoritative and unaffected by this cap.
const HISTORY_CAP: usize = 1000;

// ============================================================================
// Pricing
// ============================================================================

/// Per-million-token rates for one model family.
#[derive(Debug, Clone)]
pub struct ModelPricing {
    pub model: &'static str,
    pub input_per_million: Decimal,
    pub output_per_million: Decimal,
}

fn pricing_table() -> &'static [ModelPricing] {
    static TABLE: OnceLock<Vec<ModelPricing>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let entry = |model, input_cents: i64, output_cents: i64| ModelPricing {
            model,
            input_per_million: Decimal::new(input_cents, 2),
            output_per_million: Decimal::new(output_cents, 2),
        };
        vec![
            // rates are USD per 1M tokens, stored as cents to stay exact
            entry("gpt-4o-mini", 15, 60),
            entry("gpt-4o", 250, 1000),
            entry("gpt-4-turbo", 1000, 3000),
            entry("gpt-4", 3000, 6000),
            entry("gpt-3.5-turbo", 50, 150),
            entry("claude-3-5-sonnet", 300, 1500),
            entry("claude-3-5-haiku", 80, 400),
            entry("claude-3-opus", 1500, 7500),
            entry("deepseek-chat", 27, 110),
            entry("deepseek-reasoner", 55, 219),
        ]
    })
}

/// Rates for a model: exact match first, else the longest matching prefix,
/// else zero — local and unknown models are free by convention.
pub fn pricing_for(model: &str) -> (Decimal, Decimal) {
    let table = pricing_table();

    if let Some(p) = table.iter().find(|p| p.model == model) {
        return (p.input_per_million, p.output_per_million);
    }

    let best = table
        .iter()
        .filter(|p| model.starts_with(p.model))
        .max_by_key(|p| p.model.len());
    match best {
        Some(p) => (p.input_per_million, p.output_per_million),
        None => (Decimal::ZERO, Decimal::ZERO),
    }
}

/// Exact-decimal cost of one request:
/// `input/1e6 * input_rate + output/1e6 * output_rate`.
pub fn cost_of(model: &str, usage: TokenUsage) -> Decimal {
    let (input_rate, output_rate) = pricing_for(model);
    let million = Decimal::from(1_000_000u32);
    Decimal::from(usage.input_tokens) / million * input_rate
        + Decimal::from(usage.output_tokens) / million * output_rate
}

// ============================================================================
// Request metrics
// ============================================================================

/// Scoped timer handed out by [`UsageAccountant::start_request`].
#[derive(Debug)]
pub struct RequestTimer {
    started: Instant,
}

impl RequestTimer {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Immutable record of one completed request.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    pub id: Uuid,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency: Duration,
    pub cost: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate snapshot for one accountant scope, derived from running totals
/// (never recomputed by re-scanning the capped history).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetrics {
    pub provider: String,
    pub model: String,
    pub total_requests: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_latency: Duration,
    pub total_cost: Decimal,
    pub average_latency: Duration,
}

#[derive(Debug, Default)]
struct AccountantInner {
    total_requests: u64,
    total_input_tokens: u64,
    total_output_tokens: u64,
    total_latency: Duration,
    total_cost: Decimal,
    history: VecDeque<RequestMetrics>,
}

/// Records per-request metrics and aggregates them for one scope.
///
/// Pathways each own one accountant; the pool holds a separate, explicitly
/// injected aggregate instance that every completed request is also recorded
/// into. There is no process-wide singleton.
#[derive(Debug)]
pub struct UsageAccountant {
    provider: String,
    model: String,
    inner: Mutex<AccountantInner>,
}

impl UsageAccountant {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            inner: Mutex::new(AccountantInner::default()),
        }
    }

    /// Accountant aggregating across providers and models.
    pub fn aggregate() -> Self {
        Self::new("aggregate", "*")
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Start timing one request.
    pub fn start_request(&self) -> RequestTimer {
        RequestTimer {
            started: Instant::now(),
        }
    }

    /// Complete the request: computes cost, appends to the capped history,
    /// and folds into the running totals.
    pub fn end_request(
        &self,
        timer: RequestTimer,
        model: &str,
        usage: TokenUsage,
    ) -> RequestMetrics {
        let metrics = RequestMetrics {
            id: Uuid::new_v4(),
            model: model.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            latency: timer.elapsed(),
            cost: cost_of(model, usage),
            timestamp: Utc::now(),
        };
        self.record(metrics.clone());
        metrics
    }

    /// Record an already-built metrics entry. This is how the pool-level
    /// aggregate receives each pathway's completed requests.
    pub fn record(&self, metrics: RequestMetrics) {
        let mut inner = self.inner.lock();
        inner.total_requests += 1;
        inner.total_input_tokens += u64::from(metrics.input_tokens);
        inner.total_output_tokens += u64::from(metrics.output_tokens);
        inner.total_latency += metrics.latency;
        inner.total_cost += metrics.cost;
        if inner.history.len() == HISTORY_CAP {
            inner.history.pop_front();
        }
        inner.history.push_back(metrics);
    }

    /// Aggregate view, readable at any time without blocking in-flight
    /// requests.
    pub fn session_metrics(&self) -> SessionMetrics {
        let inner = self.inner.lock();
        let average_latency = if inner.total_requests > 0 {
            inner.total_latency / inner.total_requests as u32
        } else {
            Duration::ZERO
        };
        SessionMetrics {
            provider: self.provider.clone(),
            model: self.model.clone(),
            total_requests: inner.total_requests,
            total_input_tokens: inner.total_input_tokens,
            total_output_tokens: inner.total_output_tokens,
            total_latency: inner.total_latency,
            total_cost: inner.total_cost,
            average_latency,
        }
    }

    /// Most recent completed requests (capped at 1000).
    pub fn recent_requests(&self) -> Vec<RequestMetrics> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Clear totals and history.
    pub fn reset(&self) {
        *self.inner.lock() = AccountantInner::default();
    }
}
