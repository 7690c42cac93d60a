//! TOML configuration.
//!
//! Every section except `[docs]` has defaults, so the smallest useful
//! configuration is:
//!
//! ```toml
//! [docs]
//! root = "../logfire/docs"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub docs: DocsConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    /// Root of the markdown documentation tree.
    pub root: PathBuf,
    /// Public site prefix used to turn `foo/bar.md` into `<base_url>/foo/bar/`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Files whose path contains any of these substrings are never listed or indexed.
    #[serde(default = "default_ignored")]
    pub ignored: Vec<String>,
}

fn default_base_url() -> String {
    "https://logfire.pydantic.dev/docs".to_string()
}

fn default_ignored() -> Vec<String> {
    vec![
        "release-notes.md".to_string(),
        "help.md".to_string(),
        "/api/".to_string(),
        "/legal/".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/docs-chat.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Chunks whose full text exceeds this many UTF-8 bytes are dropped.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
    /// Finest splitting granularity: chunks are produced for 0..=max_split_level.
    #[serde(default = "default_max_split_level")]
    pub max_split_level: u8,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: default_max_chunk_bytes(),
            max_split_level: default_max_split_level(),
        }
    }
}

fn default_max_chunk_bytes() -> usize {
    16384
}
fn default_max_split_level() -> u8 {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_fusion")]
    pub fusion: String,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            fusion: default_fusion(),
            hybrid_alpha: default_hybrid_alpha(),
            rrf_k: default_rrf_k(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            limit: default_limit(),
        }
    }
}

fn default_mode() -> String {
    "hybrid".to_string()
}
fn default_fusion() -> String {
    "rrf".to_string()
}
fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_candidate_k() -> i64 {
    50
}
fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// A model offered to the chat front end.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelChoice {
    /// `"<provider>:<model>"`, e.g. `"openai:gpt-4.1"`.
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_agent_provider")]
    pub provider: String,
    #[serde(default = "default_agent_model")]
    pub model: String,
    /// API base override (OpenAI-compatible servers, proxies).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_agent_retries")]
    pub max_retries: u32,
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
    /// Product the documentation describes; used in the agent instructions.
    #[serde(default = "default_product")]
    pub product: String,
    /// Models selectable from the front end. Empty means only the default.
    #[serde(default)]
    pub models: Vec<ModelChoice>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: default_agent_provider(),
            model: default_agent_model(),
            url: None,
            max_tokens: default_max_tokens(),
            max_tool_rounds: default_max_tool_rounds(),
            max_retries: default_agent_retries(),
            timeout_secs: default_agent_timeout(),
            product: default_product(),
            models: Vec::new(),
        }
    }
}

fn default_agent_provider() -> String {
    "anthropic".to_string()
}
fn default_agent_model() -> String {
    "claude-sonnet-4-0".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_tool_rounds() -> usize {
    8
}
fn default_agent_retries() -> u32 {
    3
}
fn default_agent_timeout() -> u64 {
    120
}
fn default_product() -> String {
    "Pydantic Logfire, an observability platform".to_string()
}

impl AgentConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Resolve a front-end model id (`"openai:gpt-4.1"`) into a config for that model.
    ///
    /// Returns `None` when the id is not one of the configured choices.
    pub fn with_model_id(&self, id: &str) -> Option<AgentConfig> {
        let choice = self.models.iter().find(|m| m.id == id)?;
        let (provider, model) = choice.id.split_once(':')?;
        let mut cfg = self.clone();
        if provider != cfg.provider {
            // A different vendor never shares the API base override.
            cfg.url = None;
        }
        cfg.provider = provider.to_string();
        cfg.model = model.to_string();
        Some(cfg)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory holding a built chat front end (`index.html`, `assets/`).
    #[serde(default)]
    pub dist_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            dist_dir: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:38001".to_string()
}

impl Config {
    /// Defaults for everything, rooted at `docs_root`, with no external
    /// services: keyword retrieval, embeddings and agent disabled.
    pub fn minimal(docs_root: impl Into<PathBuf>) -> Self {
        Self {
            docs: DocsConfig {
                root: docs_root.into(),
                base_url: default_base_url(),
                ignored: default_ignored(),
            },
            db: DbConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig {
                mode: "keyword".to_string(),
                ..RetrievalConfig::default()
            },
            embedding: EmbeddingConfig {
                provider: "disabled".to_string(),
                ..EmbeddingConfig::default()
            },
            agent: AgentConfig {
                provider: "disabled".to_string(),
                ..AgentConfig::default()
            },
            server: ServerConfig::default(),
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_chunk_bytes == 0 {
            bail!("chunking.max_chunk_bytes must be > 0");
        }
        if self.chunking.max_split_level > 6 {
            bail!("chunking.max_split_level must be in 0..=6");
        }

        if self.retrieval.limit < 1 {
            bail!("retrieval.limit must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.hybrid_alpha) {
            bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
        }
        if self.retrieval.rrf_k <= 0.0 {
            bail!("retrieval.rrf_k must be > 0");
        }
        match self.retrieval.mode.as_str() {
            "keyword" => {}
            "semantic" | "hybrid" => {
                if !self.embedding.is_enabled() {
                    bail!(
                        "retrieval.mode '{}' requires embeddings. Set [embedding] provider in config.",
                        self.retrieval.mode
                    );
                }
            }
            other => bail!(
                "Unknown retrieval mode: '{}'. Must be keyword, semantic, or hybrid.",
                other
            ),
        }
        match self.retrieval.fusion.as_str() {
            "rrf" | "weighted" => {}
            other => bail!("Unknown fusion: '{}'. Must be rrf or weighted.", other),
        }

        match self.embedding.provider.as_str() {
            "disabled" | "local" => {}
            "openai" | "ollama" => {
                if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                    bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ),
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        match self.agent.provider.as_str() {
            "disabled" | "anthropic" | "openai" => {}
            other => bail!(
                "Unknown agent provider: '{}'. Must be disabled, anthropic, or openai.",
                other
            ),
        }
        if self.agent.is_enabled() && self.agent.model.trim().is_empty() {
            bail!("agent.model must be specified when provider is '{}'", self.agent.provider);
        }
        for choice in &self.agent.models {
            if choice.id.split_once(':').is_none() {
                bail!(
                    "agent.models id '{}' must look like '<provider>:<model>'",
                    choice.id
                );
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let cfg: Config = toml::from_str(toml_str)?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let cfg = parse(
            r#"
            [docs]
            root = "docs"

            [embedding]
            provider = "local"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.chunking.max_chunk_bytes, 16384);
        assert_eq!(cfg.chunking.max_split_level, 4);
        assert_eq!(cfg.retrieval.limit, 10);
        assert_eq!(cfg.retrieval.mode, "hybrid");
        assert_eq!(cfg.docs.ignored.len(), 4);
        assert!(cfg.docs.ignored.contains(&"release-notes.md".to_string()));
    }

    #[test]
    fn hybrid_requires_embeddings() {
        let err = parse(
            r#"
            [docs]
            root = "docs"
            [embedding]
            provider = "disabled"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("requires embeddings"));
    }

    #[test]
    fn keyword_mode_without_embeddings_is_fine() {
        let cfg = parse(
            r#"
            [docs]
            root = "docs"
            [retrieval]
            mode = "keyword"
            [embedding]
            provider = "disabled"
            "#,
        )
        .unwrap();
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn remote_embeddings_need_model_and_dims() {
        let err = parse(
            r#"
            [docs]
            root = "docs"
            [embedding]
            provider = "openai"
            model = "text-embedding-3-small"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn rejects_unknown_fusion_and_alpha() {
        assert!(parse(
            r#"
            [docs]
            root = "docs"
            [retrieval]
            mode = "keyword"
            fusion = "max"
            [embedding]
            provider = "disabled"
            "#,
        )
        .is_err());
        assert!(parse(
            r#"
            [docs]
            root = "docs"
            [retrieval]
            mode = "keyword"
            hybrid_alpha = 1.5
            [embedding]
            provider = "disabled"
            "#,
        )
        .is_err());
    }

    #[test]
    fn model_choice_resolution() {
        let mut agent = AgentConfig {
            url: Some("https://proxy.internal".to_string()),
            ..AgentConfig::default()
        };
        agent.models = vec![
            ModelChoice {
                id: "openai:gpt-4.1".to_string(),
                name: "GPT 4.1".to_string(),
            },
            ModelChoice {
                id: "anthropic:claude-sonnet-4-5".to_string(),
                name: "Claude Sonnet 4.5".to_string(),
            },
        ];

        let openai = agent.with_model_id("openai:gpt-4.1").unwrap();
        assert_eq!(openai.provider, "openai");
        assert_eq!(openai.model, "gpt-4.1");
        assert!(openai.url.is_none());

        let claude = agent.with_model_id("anthropic:claude-sonnet-4-5").unwrap();
        assert_eq!(claude.model, "claude-sonnet-4-5");
        assert_eq!(claude.url.as_deref(), Some("https://proxy.internal"));

        assert!(agent.with_model_id("google:gemini").is_none());
    }

    #[test]
    fn minimal_config_is_valid() {
        let cfg = Config::minimal("/tmp/docs");
        cfg.validate().unwrap();
        assert_eq!(cfg.retrieval.mode, "keyword");
        assert!(!cfg.agent.is_enabled());
    }

    #[test]
    fn example_config_parses() {
        let cfg = parse(include_str!("../config/docs-chat.example.toml")).unwrap();
        assert_eq!(cfg.agent.models.len(), 2);
        assert_eq!(cfg.server.bind, "127.0.0.1:38001");
        assert_eq!(cfg.retrieval.fusion, "rrf");
    }
}
