//! Conflux - resilient dispatch layer for heterogeneous chat backends
//!
//! Presents many remote text-generation backends as one logical endpoint.
//! A [`ProviderPool`] selects among named [`Pathway`]s with weighted
//! round-robin and failover; each pathway wraps its transport in bounded
//! retry and a circuit breaker; streams pass through a [`ReasoningExtractor`]
//! that splits inline `<think>` regions regardless of chunking; every
//! completed request lands in a [`UsageAccountant`].
//!
//! # Quick start
//!
//! ```rust,ignore
//! use conflux::{ProviderPool, Pathway, UsageAccountant};
//! use conflux::transports::OllamaTransport;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let aggregate = Arc::new(UsageAccountant::aggregate());
//! let pool = ProviderPool::builder()
//!     .pathway(Pathway::builder("local", Arc::new(OllamaTransport::from_env())).build())
//!     .aggregate(aggregate.clone())
//!     .build();
//!
//! let cancel = CancellationToken::new();
//! let response = pool.generate("Why is the sky blue?", &cancel).await?;
//! println!("{}", response.content);
//! println!("cost so far: {}", aggregate.session_metrics().total_cost);
//! ```

pub mod accounting;
pub mod breaker;
pub mod config;
pub mod extractor;
pub mod pathway;
pub mod pool;
pub mod resilience;
pub mod transport;
pub mod transports;
pub mod types;

// Re-export core types
pub use accounting::{
    ModelPricing, RequestMetrics, RequestTimer, SessionMetrics, UsageAccountant, cost_of,
    pricing_for,
};
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use config::{BackendKind, ConfigError, PoolConfig, ProviderConfig};
pub use extractor::ReasoningExtractor;
pub use pathway::{Pathway, PathwayBuilder, PathwaySnapshot, Tier};
pub use pool::{FragmentStream, PoolBuilder, PoolError, PoolResponse, ProviderPool};
pub use resilience::Resilience;
pub use transport::{ChatTransport, RawStream};
pub use types::{
    Backoff, FailureClass, RetryPolicy, StreamFragment, ThinkingResponse, TokenUsage,
    TransportError, TransportResult,
};

// Re-export the cancellation token so callers don't need a direct
// tokio-util dependency
pub use tokio_util::sync::CancellationToken;
