//! Resilient execution of a single transport call
//!
//! Wraps exactly one transport operation with bounded retry and a circuit
//! breaker. Composition order: retry is the outer layer, the breaker is the
//! inner layer — an open breaker is observed before any backoff delay is
//! spent, and every handled failure feeds the breaker's count.

use crate::breaker::CircuitBreaker;
use crate::types::{FailureClass, RetryPolicy, TransportError, TransportResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Executes one pathway's transport calls under its retry policy, circuit
/// breaker, optional per-call time budget, and optional shared concurrency
/// limiter.
///
/// Cancellation semantics: a caller-fired [`CancellationToken`] aborts
/// immediately — no retry, no breaker or health mutation. Expiry of the
/// per-call budget surfaces as [`TransportError::Timeout`], which is a
/// retryable, breaker-counted failure. The two ride the same tokio
/// machinery but are distinguished by construction.
pub struct Resilience {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    /// Client-side elapsed-time budget for one attempt
    budget: Option<Duration>,
    /// Bounded limiter shared by pathways hitting the same remote endpoint
    limiter: Option<Arc<Semaphore>>,
}

impl Resilience {
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            policy,
            breaker,
            budget: None,
            limiter: None,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` under the full policy stack. `op` is re-invoked for each
    /// attempt; the underlying network call happens inside it.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> TransportResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            // breaker first: an open circuit is observed before any backoff
            // delay is spent
            if !self.breaker.can_execute() {
                return Err(TransportError::CircuitOpen(
                    self.breaker.name().to_string(),
                ));
            }

            if attempt > 1 {
                let delay = self.policy.backoff.delay(attempt - 1);
                debug!(
                    breaker = %self.breaker.name(),
                    attempt,
                    max_attempts,
                    "retrying after {}ms",
                    delay.as_millis()
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            // acquire the shared-endpoint permit outside the breaker but
            // before the network call; the permit guard releases it on every
            // exit path
            let _permit = match &self.limiter {
                Some(limiter) => {
                    let acquired = tokio::select! {
                        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                        permit = limiter.clone().acquire_owned() => permit,
                    };
                    match acquired {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            return Err(TransportError::Other(
                                "concurrency limiter closed".to_string(),
                            ));
                        }
                    }
                }
                None => None,
            };

            let result = self.run_attempt(cancel, op()).await;

            match result {
                Ok(value) => {
                    self.breaker.record_success();
                    if attempt > 1 {
                        debug!(
                            breaker = %self.breaker.name(),
                            attempt,
                            "call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => match error.class() {
                    FailureClass::Cancelled => return Err(TransportError::Cancelled),
                    FailureClass::Transient => {
                        if error.counts_toward_breaker() {
                            self.breaker.record_failure();
                        }
                        if attempt < max_attempts {
                            warn!(
                                breaker = %self.breaker.name(),
                                attempt,
                                max_attempts,
                                %error,
                                "transient failure, will retry"
                            );
                            continue;
                        }
                        warn!(
                            breaker = %self.breaker.name(),
                            attempts = max_attempts,
                            %error,
                            "retries exhausted"
                        );
                        return Err(error);
                    }
                    FailureClass::Fatal => {
                        return Err(error);
                    }
                },
            }
        }

        Err(TransportError::Other(
            "retry loop completed without result".to_string(),
        ))
    }

    /// One attempt: races the operation against caller cancellation and the
    /// per-call budget.
    async fn run_attempt<T, Fut>(
        &self,
        cancel: &CancellationToken,
        fut: Fut,
    ) -> TransportResult<T>
    where
        Fut: Future<Output = TransportResult<T>>,
    {
        match self.budget {
            Some(budget) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(TransportError::Cancelled),
                    outcome = tokio::time::timeout(budget, fut) => match outcome {
                        Ok(result) => result,
                        Err(_) => Err(TransportError::Timeout(format!(
                            "call exceeded {}ms budget",
                            budget.as_millis()
                        ))),
                    },
                }
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(TransportError::Cancelled),
                    result = fut => result,
                }
            }
        }
    }
}
