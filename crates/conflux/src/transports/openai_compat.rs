//! OpenAI-compatible chat transport
//!
//! Speaks the `/chat/completions` surface shared by OpenAI, vLLM, LocalAI,
//! DeepSeek, and most gateway products. Reasoning arrives either as the
//! structured `reasoning_content` response field (DeepSeek-style) or inline
//! in the content; both normalize to the uniform shape before leaving this
//! module — streaming re-frames structured reasoning deltas as inline
//! markers so every downstream consumer sees one format.

use crate::extractor::ReasoningExtractor;
use crate::transport::{ChatTransport, RawStream};
use crate::types::*;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Configuration for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    /// API key; some local deployments ignore it entirely
    pub api_key: String,
    /// Base URL up to and including the version segment
    pub base_url: String,
    /// Model id sent with every request
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Request timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for OpenAiCompatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

impl OpenAiCompatConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Read `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `OPENAI_MODEL` from the
    /// environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            cfg.api_key = key;
        }
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            cfg.base_url = base_url;
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            cfg.model = model;
        }
        cfg
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct UsageBody {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceBody {
    message: MessageBody,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionBody {
    choices: Vec<ChoiceBody>,
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
struct DeltaBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChoiceBody {
    delta: DeltaBody,
}

#[derive(Debug, Deserialize)]
struct StreamChunkBody {
    choices: Vec<StreamChoiceBody>,
}

/// OpenAI-compatible transport
pub struct OpenAiCompatTransport {
    client: reqwest::Client,
    config: OpenAiCompatConfig,
}

impl OpenAiCompatTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_config(OpenAiCompatConfig::new(api_key))
    }

    pub fn from_env() -> Self {
        Self::with_config(OpenAiCompatConfig::from_env())
    }

    pub fn with_config(config: OpenAiCompatConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    pub fn config(&self) -> &OpenAiCompatConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, prompt: &str, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.config.temperature,
            "stream": stream,
        })
    }

    fn map_error(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            TransportError::NetworkError(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }

    fn map_status(status: reqwest::StatusCode, body: &str) -> TransportError {
        let message = if body.is_empty() {
            status.to_string()
        } else {
            body.to_string()
        };
        match status.as_u16() {
            401 | 403 => TransportError::AuthError(message),
            429 => TransportError::RateLimited(message),
            _ => TransportError::ApiError {
                code: Some(status.as_u16().to_string()),
                message,
            },
        }
    }

    async fn post_completion(&self, prompt: &str) -> TransportResult<ChatCompletionBody> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(prompt, false))
            .send()
            .await
            .map_err(Self::map_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }

        response
            .json::<ChatCompletionBody>()
            .await
            .map_err(|e| TransportError::SerializationError(e.to_string()))
    }
}

#[async_trait]
impl ChatTransport for OpenAiCompatTransport {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_structured_reasoning(&self) -> bool {
        true
    }

    async fn generate(&self, prompt: &str) -> TransportResult<String> {
        let body = self.post_completion(prompt).await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TransportError::SerializationError("response had no choices".into()))
    }

    async fn generate_with_reasoning(&self, prompt: &str) -> TransportResult<ThinkingResponse> {
        let body = self.post_completion(prompt).await?;
        let usage = body.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });
        let message = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| TransportError::SerializationError("response had no choices".into()))?;

        let raw_content = message.content.unwrap_or_default();
        let (reasoning, content) = match message.reasoning_content {
            // structured field wins; content is taken verbatim
            Some(r) if !r.is_empty() => (Some(r), raw_content),
            _ => ReasoningExtractor::split(&raw_content),
        };

        Ok(ThinkingResponse {
            reasoning,
            content,
            usage,
            ..Default::default()
        })
    }

    async fn stream_with_reasoning(&self, prompt: &str) -> TransportResult<RawStream> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(prompt, true))
            .send()
            .await
            .map_err(Self::map_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }

        struct SseState<S> {
            bytes: S,
            line_buf: String,
            pending: VecDeque<String>,
            reasoning_open: bool,
            done: bool,
        }

        let state = SseState {
            bytes: Box::pin(response.bytes_stream()),
            line_buf: String::new(),
            pending: VecDeque::new(),
            reasoning_open: false,
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(fragment) = st.pending.pop_front() {
                    return Some((Ok(fragment), st));
                }
                if st.done {
                    return None;
                }

                match st.bytes.next().await {
                    Some(Ok(chunk)) => {
                        st.line_buf.push_str(&String::from_utf8_lossy(&chunk));
                        while let Some(pos) = st.line_buf.find('\n') {
                            let line: String = st.line_buf.drain(..=pos).collect();
                            let line = line.trim();
                            let Some(data) = line.strip_prefix("data:") else {
                                continue;
                            };
                            let data = data.trim();
                            if data == "[DONE]" {
                                if st.reasoning_open {
                                    st.pending.push_back("</think>".to_string());
                                    st.reasoning_open = false;
                                }
                                st.done = true;
                                break;
                            }
                            match serde_json::from_str::<StreamChunkBody>(data) {
                                Ok(parsed) => {
                                    let Some(choice) = parsed.choices.into_iter().next() else {
                                        continue;
                                    };
                                    // structured reasoning deltas are re-framed
                                    // as inline markers
                                    if let Some(r) = choice.delta.reasoning_content {
                                        if !r.is_empty() {
                                            if !st.reasoning_open {
                                                st.pending.push_back("<think>".to_string());
                                                st.reasoning_open = true;
                                            }
                                            st.pending.push_back(r);
                                        }
                                    }
                                    if let Some(c) = choice.delta.content {
                                        if !c.is_empty() {
                                            if st.reasoning_open {
                                                st.pending.push_back("</think>".to_string());
                                                st.reasoning_open = false;
                                            }
                                            st.pending.push_back(c);
                                        }
                                    }
                                }
                                Err(e) => {
                                    // undecodable chunk mid-stream: skip, keep going
                                    debug!("skipping malformed stream chunk: {}", e);
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        return Some((Err(Self::map_error(e)), st));
                    }
                    None => {
                        if st.reasoning_open {
                            st.pending.push_back("</think>".to_string());
                            st.reasoning_open = false;
                        }
                        st.done = true;
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
