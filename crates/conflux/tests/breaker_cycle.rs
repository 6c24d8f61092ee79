//! Full circuit-breaker lifecycle observed through a pool: trip, fast-fail
//! window, single probe, close or reopen.

use conflux::transports::MockTransport;
use conflux::{
    BreakerConfig, CancellationToken, CircuitState, Pathway, PoolError, ProviderPool, RetryPolicy,
    TransportError,
};
use std::sync::Arc;
use std::time::Duration;

const BREAK: Duration = Duration::from_millis(100);

fn tripping_pool(transport: Arc<MockTransport>) -> ProviderPool {
    ProviderPool::builder()
        .pathway(
            Pathway::builder("only", transport)
                .retry(RetryPolicy::no_retry())
                .breaker(
                    BreakerConfig::default()
                        .with_failure_threshold(5)
                        .with_break_duration(BREAK),
                )
                .build(),
        )
        .build()
}

#[tokio::test]
async fn five_consecutive_failures_open_the_circuit() {
    let t = Arc::new(MockTransport::new("m"));
    for _ in 0..5 {
        t.push_err(TransportError::NetworkError("down".into()));
    }
    t.push_ok("recovered");

    let pool = tripping_pool(t.clone());
    let cancel = CancellationToken::new();

    for _ in 0..4 {
        pool.generate("q", &cancel).await.unwrap_err();
        assert_eq!(pool.snapshots()[0].circuit, CircuitState::Closed);
    }
    pool.generate("q", &cancel).await.unwrap_err();
    assert_eq!(pool.snapshots()[0].circuit, CircuitState::Open);
    assert_eq!(t.calls(), 5);

    // inside the break window every call fails fast without touching the
    // transport
    for _ in 0..3 {
        let error = pool.generate("q", &cancel).await.unwrap_err();
        match error {
            PoolError::AggregateFailure { last_error, .. } => {
                assert!(matches!(last_error, TransportError::CircuitOpen(_)));
            }
            other => panic!("expected AggregateFailure, got {other:?}"),
        }
    }
    assert_eq!(t.calls(), 5);

    // after the window one probe is admitted; its success closes the circuit
    // and resets the failure count
    tokio::time::sleep(BREAK + Duration::from_millis(30)).await;
    let response = pool.generate("q", &cancel).await.unwrap();
    assert_eq!(response.content, "recovered");
    assert_eq!(t.calls(), 6);
    assert_eq!(pool.snapshots()[0].circuit, CircuitState::Closed);
}

#[tokio::test]
async fn failed_probe_restarts_the_break_window() {
    let t = Arc::new(MockTransport::new("m"));
    for _ in 0..6 {
        t.push_err(TransportError::NetworkError("down".into()));
    }
    t.push_ok("finally");

    let pool = tripping_pool(t.clone());
    let cancel = CancellationToken::new();

    for _ in 0..5 {
        pool.generate("q", &cancel).await.unwrap_err();
    }
    assert_eq!(pool.snapshots()[0].circuit, CircuitState::Open);

    // probe fails: back to open for a fresh window
    tokio::time::sleep(BREAK + Duration::from_millis(30)).await;
    pool.generate("q", &cancel).await.unwrap_err();
    assert_eq!(t.calls(), 6);
    assert_eq!(pool.snapshots()[0].circuit, CircuitState::Open);

    // still fast-failing inside the new window
    pool.generate("q", &cancel).await.unwrap_err();
    assert_eq!(t.calls(), 6);

    tokio::time::sleep(BREAK + Duration::from_millis(30)).await;
    let response = pool.generate("q", &cancel).await.unwrap();
    assert_eq!(response.content, "finally");
    assert_eq!(pool.snapshots()[0].circuit, CircuitState::Closed);
}
