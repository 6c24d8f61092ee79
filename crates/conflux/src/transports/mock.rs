//! Scriptable in-memory transport for tests
//!
//! Queue outcomes per call, or pin a single outcome forever. Counts every
//! invocation so tests can assert how often the transport was actually hit.

use crate::extractor::ReasoningExtractor;
use crate::transport::{ChatTransport, RawStream};
use crate::types::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted call outcome.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Plain content (inline markers allowed, they normalize as usual)
    Content(String),
    /// Fully-formed response with structured reasoning
    Reasoning(ThinkingResponse),
    /// The call fails
    Error(TransportError),
    /// A streaming call yields these raw fragments in order
    Stream(Vec<TransportResult<String>>),
}

enum Script {
    Queue(VecDeque<MockOutcome>),
    Always(MockOutcome),
}

pub struct MockTransport {
    name: String,
    model: String,
    delay: Option<Duration>,
    script: Mutex<Script>,
    calls: AtomicUsize,
}

impl MockTransport {
    /// Empty queue; push outcomes before use. An exhausted queue errors,
    /// which makes over-calling visible in tests.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: "mock-model".to_string(),
            delay: None,
            script: Mutex::new(Script::Queue(VecDeque::new())),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer every call with the same content.
    pub fn always_ok(content: impl Into<String>) -> Self {
        let mut t = Self::new("mock");
        t.script = Mutex::new(Script::Always(MockOutcome::Content(content.into())));
        t
    }

    /// Fail every call with the same error.
    pub fn always_err(error: TransportError) -> Self {
        let mut t = Self::new("mock");
        t.script = Mutex::new(Script::Always(MockOutcome::Error(error)));
        t
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sleep this long inside every call, so cancellation and budget tests
    /// have something in flight to interrupt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, outcome: MockOutcome) -> &Self {
        if let Script::Queue(q) = &mut *self.script.lock() {
            q.push_back(outcome);
        }
        self
    }

    pub fn push_ok(&self, content: impl Into<String>) -> &Self {
        self.push(MockOutcome::Content(content.into()))
    }

    pub fn push_err(&self, error: TransportError) -> &Self {
        self.push(MockOutcome::Error(error))
    }

    pub fn push_stream(&self, fragments: Vec<TransportResult<String>>) -> &Self {
        self.push(MockOutcome::Stream(fragments))
    }

    /// Number of transport invocations so far (all methods).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn next(&self) -> TransportResult<MockOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = match &mut *self.script.lock() {
            Script::Always(outcome) => Some(outcome.clone()),
            Script::Queue(q) => q.pop_front(),
        };
        outcome.ok_or_else(|| TransportError::Other("unexpected call".to_string()))
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, _prompt: &str) -> TransportResult<String> {
        match self.next().await? {
            MockOutcome::Content(text) => Ok(text),
            MockOutcome::Reasoning(resp) => Ok(resp.content),
            MockOutcome::Error(error) => Err(error),
            MockOutcome::Stream(fragments) => {
                let mut joined = String::new();
                for f in fragments {
                    joined.push_str(&f?);
                }
                Ok(joined)
            }
        }
    }

    async fn generate_with_reasoning(&self, _prompt: &str) -> TransportResult<ThinkingResponse> {
        match self.next().await? {
            MockOutcome::Content(text) => {
                let (reasoning, content) = ReasoningExtractor::split(&text);
                Ok(ThinkingResponse {
                    reasoning,
                    content,
                    ..Default::default()
                })
            }
            MockOutcome::Reasoning(resp) => Ok(resp),
            MockOutcome::Error(error) => Err(error),
            MockOutcome::Stream(fragments) => {
                let mut joined = String::new();
                for f in fragments {
                    joined.push_str(&f?);
                }
                let (reasoning, content) = ReasoningExtractor::split(&joined);
                Ok(ThinkingResponse {
                    reasoning,
                    content,
                    ..Default::default()
                })
            }
        }
    }

    async fn stream_with_reasoning(&self, _prompt: &str) -> TransportResult<RawStream> {
        match self.next().await? {
            MockOutcome::Stream(fragments) => Ok(Box::pin(futures::stream::iter(fragments))),
            MockOutcome::Content(text) => {
                Ok(Box::pin(futures::stream::iter(vec![Ok(text)])))
            }
            MockOutcome::Reasoning(resp) => {
                Ok(Box::pin(futures::stream::iter(vec![Ok(resp.content)])))
            }
            MockOutcome::Error(error) => Err(error),
        }
    }
}
