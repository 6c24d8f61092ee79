//! Pool configuration
//!
//! Declarative description of a provider pool: one entry per backend plus
//! the router and resilience knobs. Loadable from TOML/YAML/JSON files with
//! environment-variable overrides via the `config` crate.

use crate::pathway::Tier;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which wire adapter a provider entry binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Any OpenAI-compatible chat-completions endpoint
    OpenaiCompat,
    /// Local Ollama deployment (OpenAI-compatible surface)
    Ollama,
}

/// One backend binding, immutable once the pool is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub backend: BackendKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Static selection weight, >= 1
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Specialization tags, free-form
    #[serde(default)]
    pub tags: Vec<String>,
    /// Capability tier; derived from the backend kind when absent
    #[serde(default)]
    pub tier: Option<Tier>,
    /// Per-pathway retry ceiling; defaults to 3, or 5 for local backends
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            name: name.into(),
            backend,
            endpoint: None,
            credential: None,
            model: None,
            weight: 1,
            enabled: true,
            tags: Vec::new(),
            tier: None,
            max_attempts: None,
        }
    }

    pub fn effective_tier(&self) -> Tier {
        self.tier.unwrap_or(match self.backend {
            BackendKind::Ollama => Tier::Local,
            BackendKind::OpenaiCompat => Tier::Standard,
        })
    }
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_max_pathway_retries() -> usize {
    3
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_break_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Pool-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub providers: Vec<ProviderConfig>,
    /// Distinct pathways tried per logical call before giving up
    #[serde(default = "default_max_pathway_retries")]
    pub max_pathway_retries: usize,
    /// Skip unhealthy pathways during selection
    #[serde(default = "default_true")]
    pub failover_enabled: bool,
    /// When set, a successful response containing this substring is treated
    /// as a degraded placeholder and booked as a failure
    #[serde(default)]
    pub degraded_sentinel: Option<String>,
    /// Client-side time budget per transport attempt, seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Bounded concurrency across pathways sharing one remote endpoint
    #[serde(default)]
    pub shared_concurrency: Option<usize>,
    /// Consecutive handled failures before a pathway's circuit opens
    #[serde(default = "default_failure_threshold")]
    pub breaker_failure_threshold: u32,
    /// Seconds an open circuit stays open before admitting a probe
    #[serde(default = "default_break_secs")]
    pub breaker_break_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            max_pathway_retries: default_max_pathway_retries(),
            failover_enabled: true,
            degraded_sentinel: None,
            request_timeout_secs: default_request_timeout_secs(),
            shared_concurrency: None,
            breaker_failure_threshold: default_failure_threshold(),
            breaker_break_secs: default_break_secs(),
        }
    }
}

/// Errors from loading or validating a pool configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl PoolConfig {
    /// Load from a configuration file (format inferred from the extension),
    /// with `CONFLUX__`-prefixed environment variables layered on top.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("CONFLUX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let pool: PoolConfig = settings.try_deserialize()?;
        pool.validate()?;
        Ok(pool)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one provider is required".to_string(),
            ));
        }
        for p in &self.providers {
            if p.name.trim().is_empty() {
                return Err(ConfigError::Invalid("provider name is empty".to_string()));
            }
            if p.weight < 1 {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}': weight must be >= 1",
                    p.name
                )));
            }
        }
        let mut names: Vec<&str> = self.providers.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.providers.len() {
            return Err(ConfigError::Invalid(
                "provider names must be unique".to_string(),
            ));
        }
        if self.max_pathway_retries == 0 {
            return Err(ConfigError::Invalid(
                "max_pathway_retries must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn toml_round_trip_with_defaults() {
        let toml_src = r#"
            [[providers]]
            name = "primary"
            backend = "openai_compat"
            endpoint = "https://api.example.com/v1"
            credential = "sk-test"
            model = "gpt-4o"

            [[providers]]
            name = "local"
            backend = "ollama"
            model = "llama3"
            weight = 2
        "#;
        let pool: PoolConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(pool.providers.len(), 2);
        assert_eq!(pool.max_pathway_retries, 3);
        assert!(pool.failover_enabled);
        assert_eq!(pool.breaker_failure_threshold, 5);
        assert_eq!(pool.breaker_break_secs, 30);

        let primary = &pool.providers[0];
        assert_eq!(primary.weight, 1);
        assert!(primary.enabled);
        assert_eq!(primary.effective_tier(), Tier::Standard);

        let local = &pool.providers[1];
        assert_eq!(local.weight, 2);
        assert_eq!(local.effective_tier(), Tier::Local);
    }

    #[test]
    fn from_file_loads_and_validates() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
            degraded_sentinel = "[stub response]"

            [[providers]]
            name = "only"
            backend = "ollama"
            model = "llama3"
            "#
        )
        .unwrap();

        let pool = PoolConfig::from_file(file.path()).unwrap();
        assert_eq!(pool.providers.len(), 1);
        assert_eq!(pool.degraded_sentinel.as_deref(), Some("[stub response]"));
    }

    #[test]
    fn empty_provider_list_is_rejected() {
        let pool = PoolConfig::default();
        assert!(matches!(pool.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut pool = PoolConfig::default();
        pool.providers
            .push(ProviderConfig::new("dup", BackendKind::Ollama));
        pool.providers
            .push(ProviderConfig::new("dup", BackendKind::Ollama));
        assert!(matches!(pool.validate(), Err(ConfigError::Invalid(_))));
    }
}
