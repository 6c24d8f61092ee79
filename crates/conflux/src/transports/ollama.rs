//! Ollama transport (thin wrapper of the OpenAI-compatible adapter)
//!
//! Points the shared adapter at a local endpoint. Local deployments ignore
//! the credential; a placeholder is sent unless one is configured.

use super::openai_compat::{OpenAiCompatConfig, OpenAiCompatTransport};
use crate::transport::{ChatTransport, RawStream};
use crate::types::*;
use async_trait::async_trait;

/// Ollama transport configuration
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL (default: http://localhost:11434/v1)
    pub base_url: String,
    /// Model id, e.g. llama3
    pub model: String,
    /// Credential forwarded to the endpoint; local deployments ignore it
    pub credential: String,
    /// Request timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3".to_string(),
            credential: "not-needed".to_string(),
            timeout_secs: 60,
        }
    }
}

impl OllamaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `OLLAMA_BASE_URL` and `OLLAMA_MODEL` from the environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            cfg.model = model;
        }
        if let Ok(base_url) = std::env::var("OLLAMA_BASE_URL") {
            let base = base_url.trim_end_matches('/');
            cfg.base_url = if base.ends_with("/v1") {
                base.to_string()
            } else {
                format!("{}/v1", base)
            };
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

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = credential.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Ollama transport delegating to the OpenAI-compatible adapter
pub struct OllamaTransport {
    inner: OpenAiCompatTransport,
}

impl Default for OllamaTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaTransport {
    pub fn new() -> Self {
        Self::with_config(OllamaConfig::new())
    }

    pub fn from_env() -> Self {
        Self::with_config(OllamaConfig::from_env())
    }

    pub fn with_config(config: OllamaConfig) -> Self {
        let inner_config = OpenAiCompatConfig::new(config.credential)
            .with_base_url(config.base_url)
            .with_model(config.model)
            .with_timeout(config.timeout_secs);
        Self {
            inner: OpenAiCompatTransport::with_config(inner_config),
        }
    }
}

#[async_trait]
impl ChatTransport for OllamaTransport {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }

    async fn generate(&self, prompt: &str) -> TransportResult<String> {
        self.inner.generate(prompt).await
    }

    async fn generate_with_reasoning(&self, prompt: &str) -> TransportResult<ThinkingResponse> {
        self.inner.generate_with_reasoning(prompt).await
    }

    async fn stream_with_reasoning(&self, prompt: &str) -> TransportResult<RawStream> {
        self.inner.stream_with_reasoning(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_local_endpoint() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434/v1");
        assert_eq!(config.model, "llama3");
        assert_eq!(config.credential, "not-needed");
    }

    #[test]
    fn configured_credential_wins_over_placeholder() {
        let config = OllamaConfig::new().with_credential("real-token");
        let transport = OllamaTransport::with_config(config);
        assert_eq!(transport.inner.config().api_key, "real-token");
    }

    #[test]
    fn transport_reports_ollama_name_and_model() {
        let transport = OllamaTransport::with_config(OllamaConfig::new().with_model("mistral"));
        assert_eq!(transport.name(), "ollama");
        assert_eq!(transport.model(), "mistral");
    }
}
