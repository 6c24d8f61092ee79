//! Router selection and failover behavior, observed through the public API.

use conflux::transports::{MockOutcome, MockTransport};
use conflux::{
    CancellationToken, Pathway, PoolError, ProviderPool, RetryPolicy, ThinkingResponse,
    TokenUsage, TransportError, UsageAccountant,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

fn no_retry_pathway(name: &str, transport: Arc<MockTransport>) -> Pathway {
    Pathway::builder(name, transport)
        .retry(RetryPolicy::no_retry())
        .build()
}

#[tokio::test]
async fn round_robin_visits_each_pathway_once_per_cycle() {
    let transports: Vec<Arc<MockTransport>> = (0..3)
        .map(|i| Arc::new(MockTransport::always_ok(format!("answer-{i}"))))
        .collect();
    let mut builder = ProviderPool::builder();
    for (i, t) in transports.iter().enumerate() {
        builder = builder.pathway(no_retry_pathway(&format!("p{}", i + 1), t.clone()));
    }
    let pool = builder.build();
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        pool.generate("q", &cancel).await.unwrap();
    }
    for t in &transports {
        assert_eq!(t.calls(), 1, "one full cycle must visit each pathway once");
    }

    for _ in 0..3 {
        pool.generate("q", &cancel).await.unwrap();
    }
    for t in &transports {
        assert_eq!(t.calls(), 2);
    }
}

#[tokio::test]
async fn two_failures_then_third_answers() {
    let p1 = Arc::new(MockTransport::new("m1"));
    p1.push_err(TransportError::NetworkError("p1 down".into()));
    p1.push_ok("p1 recovered");
    let p2 = Arc::new(MockTransport::always_err(TransportError::NetworkError(
        "p2 down".into(),
    )));
    let p3 = Arc::new(MockTransport::always_ok("OK"));

    let pool = ProviderPool::builder()
        .pathway(no_retry_pathway("p1", p1.clone()))
        .pathway(no_retry_pathway("p2", p2.clone()))
        .pathway(no_retry_pathway("p3", p3.clone()))
        .max_pathway_retries(3)
        .build();
    let cancel = CancellationToken::new();

    let response = pool.generate("q", &cancel).await.unwrap();
    assert_eq!(response.content, "OK");
    assert_eq!(response.pathway, "p3");

    let snaps = pool.snapshots();
    assert_eq!(snaps[0].failures, 1);
    assert_eq!(snaps[1].failures, 1);
    assert_eq!(snaps[2].successes, 1);

    // the cursor advanced past all three: the next call starts over at p1
    let response = pool.generate("q", &cancel).await.unwrap();
    assert_eq!(response.pathway, "p1");
    assert_eq!(response.content, "p1 recovered");
}

#[tokio::test]
async fn retry_bound_caps_distinct_pathways_tried() {
    let transports: Vec<Arc<MockTransport>> = (0..4)
        .map(|_| {
            Arc::new(MockTransport::always_err(TransportError::NetworkError(
                "down".into(),
            )))
        })
        .collect();
    let mut builder = ProviderPool::builder().max_pathway_retries(2);
    for (i, t) in transports.iter().enumerate() {
        builder = builder.pathway(no_retry_pathway(&format!("p{}", i + 1), t.clone()));
    }
    let pool = builder.build();
    let cancel = CancellationToken::new();

    let error = pool.generate("q", &cancel).await.unwrap_err();
    match error {
        PoolError::AggregateFailure { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected AggregateFailure, got {other:?}"),
    }
    let tried: usize = transports.iter().map(|t| t.calls()).sum();
    assert_eq!(tried, 2);
}

#[tokio::test]
async fn failover_disabled_still_selects_unhealthy_pathways() {
    let flaky = Arc::new(MockTransport::always_err(TransportError::NetworkError(
        "down".into(),
    )));
    let steady = Arc::new(MockTransport::always_ok("steady"));

    let pool = ProviderPool::builder()
        .pathway(
            Pathway::builder("flaky", flaky.clone())
                .retry(RetryPolicy::no_retry())
                .breaker(
                    conflux::BreakerConfig::default()
                        .with_failure_threshold(1)
                        .with_break_duration(std::time::Duration::from_secs(60)),
                )
                .build(),
        )
        .pathway(no_retry_pathway("steady", steady.clone()))
        .failover_enabled(false)
        .max_pathway_retries(2)
        .build();
    let cancel = CancellationToken::new();

    // first call: flaky fails (tripping its breaker), steady answers
    let response = pool.generate("q", &cancel).await.unwrap();
    assert_eq!(response.content, "steady");

    // with failover disabled the open breaker does not remove flaky from
    // selection; the call fails fast there and moves on without invoking
    // the transport again
    let response = pool.generate("q", &cancel).await.unwrap();
    assert_eq!(response.content, "steady");
    assert_eq!(flaky.calls(), 1);
}

#[tokio::test]
async fn fully_degraded_pool_still_answers() {
    // single pathway whose breaker is already open: selection falls back to
    // it anyway rather than refusing to answer
    let t = Arc::new(MockTransport::new("m"));
    t.push_err(TransportError::NetworkError("first".into()));
    t.push_ok("still here");

    let pool = ProviderPool::builder()
        .pathway(
            Pathway::builder("only", t.clone())
                .retry(RetryPolicy::no_retry())
                .breaker(
                    conflux::BreakerConfig::default()
                        .with_failure_threshold(1)
                        .with_break_duration(std::time::Duration::from_millis(50)),
                )
                .build(),
        )
        .build();
    let cancel = CancellationToken::new();

    let error = pool.generate("q", &cancel).await.unwrap_err();
    assert!(matches!(error, PoolError::AggregateFailure { .. }));

    // breaker is open; the degraded fallback still selects the pathway and
    // fails fast until the break window elapses
    let error = pool.generate("q", &cancel).await.unwrap_err();
    match error {
        PoolError::AggregateFailure { last_error, .. } => {
            assert!(matches!(last_error, TransportError::CircuitOpen(_)));
        }
        other => panic!("expected AggregateFailure, got {other:?}"),
    }
    assert_eq!(t.calls(), 1);

    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    let response = pool.generate("q", &cancel).await.unwrap();
    assert_eq!(response.content, "still here");
}

#[tokio::test]
async fn usage_flows_into_both_accountants_with_exact_cost() {
    let t = Arc::new(MockTransport::new("m").with_model("gpt-4o"));
    t.push(MockOutcome::Reasoning(ThinkingResponse {
        reasoning: None,
        content: "ok".to_string(),
        reasoning_tokens: None,
        content_tokens: None,
        usage: Some(TokenUsage::new(1000, 500)),
    }));

    let aggregate = Arc::new(UsageAccountant::aggregate());
    let pool = ProviderPool::builder()
        .pathway(no_retry_pathway("paid", t))
        .aggregate(aggregate.clone())
        .build();
    let cancel = CancellationToken::new();

    pool.generate("q", &cancel).await.unwrap();

    let expected = Decimal::from_str("0.0075").unwrap();
    assert_eq!(aggregate.session_metrics().total_cost, expected);

    let snaps = pool.snapshots();
    assert_eq!(snaps[0].metrics.total_cost, expected);
    assert_eq!(snaps[0].metrics.total_input_tokens, 1000);
    assert_eq!(snaps[0].metrics.total_output_tokens, 500);
}
