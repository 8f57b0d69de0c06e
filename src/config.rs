use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    /// Inputs longer than this are silently truncated before submission.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            max_input_chars: default_max_input_chars(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_input_chars() -> usize {
    8190
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_pages_collection")]
    pub pages_collection: String,
    #[serde(default = "default_interactions_collection")]
    pub interactions_collection: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on caller-supplied `k` for retrieval.
    #[serde(default = "default_max_k")]
    pub max_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            pages_collection: default_pages_collection(),
            interactions_collection: default_interactions_collection(),
            timeout_secs: default_timeout_secs(),
            max_k: default_max_k(),
        }
    }
}

fn default_index_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_pages_collection() -> String {
    "pages".to_string()
}
fn default_interactions_collection() -> String {
    "interactions".to_string()
}
fn default_max_k() -> usize {
    25
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay between outbound embedding dispatches. A throttle, not a
    /// correctness mechanism.
    #[serde(default = "default_dispatch_delay_ms")]
    pub dispatch_delay_ms: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            dispatch_delay_ms: default_dispatch_delay_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_retry_limit() -> u32 {
    3
}
fn default_poll_interval_ms() -> u64 {
    5000
}
fn default_dispatch_delay_ms() -> u64 {
    200
}
fn default_max_in_flight() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CorrelatorConfig {
    /// Workspaces allowed to submit events. Empty means allow all.
    #[serde(default)]
    pub allowed_workspaces: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResponderConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Webhook receiving answer posts (e.g. a chat relay).
    #[serde(default)]
    pub post_url: Option<String>,
    /// Pages retrieved as context per question.
    #[serde(default = "default_context_k")]
    pub context_k: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            post_url: None,
            context_k: default_context_k(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ResponderConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_context_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.embedding.max_input_chars == 0 {
        anyhow::bail!("embedding.max_input_chars must be > 0");
    }

    if config.reconcile.retry_limit == 0 {
        anyhow::bail!("reconcile.retry_limit must be >= 1");
    }
    if config.reconcile.max_in_flight == 0 {
        anyhow::bail!("reconcile.max_in_flight must be >= 1");
    }
    if config.index.max_k == 0 {
        anyhow::bail!("index.max_k must be >= 1");
    }

    match config.responder.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown responder provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.responder.is_enabled() && config.responder.model.is_none() {
        anyhow::bail!(
            "responder.model must be specified when provider is '{}'",
            config.responder.provider
        );
    }

    Ok(config)
}
