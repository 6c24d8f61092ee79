//! Core types shared across the dispatch layer
//!
//! Error taxonomy, retry/backoff policies, and the normalized response and
//! stream-fragment shapes every transport reduces to.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Error taxonomy
// ============================================================================

/// Failure taxonomy for a single transport call.
///
/// Retry eligibility is an explicit classification (`class()`), not something
/// inferred from stack unwinding: the resilience layer consumes the class in
/// a bounded loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Backend returned an API-level error payload
    #[error("API error: {message} (code: {code:?})")]
    ApiError {
        code: Option<String>,
        message: String,
    },
    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),
    /// Rate limit exceeded (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),
    /// Network-transport failure
    #[error("Network error: {0}")]
    NetworkError(String),
    /// The client-side elapsed-time budget expired
    #[error("Request timeout: {0}")]
    Timeout(String),
    /// The caller explicitly aborted the call
    #[error("Request cancelled by caller")]
    Cancelled,
    /// Circuit breaker refused the call before the transport was invoked
    #[error("Circuit open for pathway '{0}'")]
    CircuitOpen(String),
    /// Response could not be decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Operation not supported by this transport
    #[error("Not supported: {0}")]
    Unsupported(String),
    /// Other error
    #[error("Transport error: {0}")]
    Other(String),
}

/// How the resilience layer should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry within the attempt budget
    Transient,
    /// Surface immediately, do not retry
    Fatal,
    /// Caller abort: surface immediately, never counted against health
    Cancelled,
}

impl TransportError {
    /// Classify this error for the retry loop.
    ///
    /// Transient: 429, 5xx, network failure, client-budget timeout.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Cancelled => FailureClass::Cancelled,
            Self::RateLimited(_) | Self::NetworkError(_) | Self::Timeout(_) => {
                FailureClass::Transient
            }
            Self::ApiError { code: Some(c), .. } if c.starts_with('5') => FailureClass::Transient,
            _ => FailureClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    /// Whether this failure feeds the circuit breaker's consecutive-failure
    /// count. 5xx, network failure, and genuine client-side timeouts do;
    /// rate limiting backs off without tripping the breaker.
    pub fn counts_toward_breaker(&self) -> bool {
        match self {
            Self::NetworkError(_) | Self::Timeout(_) => true,
            Self::ApiError { code: Some(c), .. } => c.starts_with('5'),
            _ => false,
        }
    }
}

/// Transport result type
pub type TransportResult<T> = Result<T, TransportError>;

// ============================================================================
// Normalized response shapes
// ============================================================================

/// Token usage reported by a backend for one completed request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A completed generation with its reasoning split out.
///
/// Structured backends supply `reasoning` directly; inline-marker backends
/// have their `<think>` regions extracted before the response leaves the
/// transport layer. Both arrive here in the same shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinkingResponse {
    pub reasoning: Option<String>,
    pub content: String,
    pub reasoning_tokens: Option<u32>,
    pub content_tokens: Option<u32>,
    pub usage: Option<TokenUsage>,
}

impl ThinkingResponse {
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// One mode-tagged segment of a decoded stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFragment {
    pub is_reasoning: bool,
    pub text: String,
}

impl StreamFragment {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            is_reasoning: false,
            text: text.into(),
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            is_reasoning: true,
            text: text.into(),
        }
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Backoff strategy for retry delays
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Backoff {
    /// Fixed delay between retries
    Fixed { delay_ms: u64 },
    /// Exponential backoff with jitter: retry `n` (1-indexed) waits
    /// `base * 2^n`, capped, plus a uniform jitter in `[0, jitter_ms)`.
    ExponentialWithJitter {
        base_ms: u64,
        max_ms: u64,
        jitter_ms: u64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::ExponentialWithJitter {
            base_ms: 1000,
            max_ms: 30_000,
            jitter_ms: 1000,
        }
    }
}

impl Backoff {
    /// Delay before retry `n` (1-indexed; the first attempt never waits).
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Self::ExponentialWithJitter {
                base_ms,
                max_ms,
                jitter_ms,
            } => {
                let base = base_ms.saturating_mul(2u64.saturating_pow(retry.min(10)));
                let capped = base.min(*max_ms);
                let jitter = if *jitter_ms > 0 {
                    use rand::Rng;
                    rand::thread_rng().gen_range(0..*jitter_ms)
                } else {
                    0
                };
                Duration::from_millis(capped + jitter)
            }
        }
    }
}

/// Retry policy for one pathway's transport calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first attempt)
    pub max_attempts: u32,
    /// Backoff strategy for delays
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    /// Policy for higher-variance backends: more attempts, same backoff curve.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::default(),
        }
    }

    /// Fail on the first error without retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed { delay_ms: 0 },
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(TransportError::RateLimited("429".into()).is_retryable());
        assert!(TransportError::NetworkError("reset".into()).is_retryable());
        assert!(TransportError::Timeout("60s".into()).is_retryable());
        assert!(
            TransportError::ApiError {
                code: Some("503".into()),
                message: "overloaded".into()
            }
            .is_retryable()
        );

        assert!(
            !TransportError::ApiError {
                code: Some("400".into()),
                message: "bad request".into()
            }
            .is_retryable()
        );
        assert!(!TransportError::AuthError("bad key".into()).is_retryable());
        assert!(!TransportError::Cancelled.is_retryable());
        assert_eq!(TransportError::Cancelled.class(), FailureClass::Cancelled);
    }

    #[test]
    fn rate_limit_does_not_feed_breaker() {
        assert!(!TransportError::RateLimited("429".into()).counts_toward_breaker());
        assert!(TransportError::NetworkError("reset".into()).counts_toward_breaker());
        assert!(TransportError::Timeout("budget".into()).counts_toward_breaker());
        assert!(
            TransportError::ApiError {
                code: Some("502".into()),
                message: "bad gateway".into()
            }
            .counts_toward_breaker()
        );
    }

    #[test]
    fn exponential_backoff_doubles_per_retry() {
        let backoff = Backoff::ExponentialWithJitter {
            base_ms: 1000,
            max_ms: 30_000,
            jitter_ms: 0,
        };
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        // capped at max
        assert_eq!(backoff.delay(10), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_below_one_second() {
        let backoff = Backoff::default();
        for _ in 0..50 {
            let d = backoff.delay(1);
            assert!(d >= Duration::from_secs(2));
            assert!(d < Duration::from_secs(3));
        }
    }
}
