use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_extract_bytes")]
    pub max_extract_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_extract_bytes: default_max_extract_bytes(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
        "**/*.html".to_string(),
    ]
}
fn default_max_extract_bytes() -> u64 {
    100 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    6144
}
fn default_overlap() -> usize {
    248
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_llm_model(),
            api_base: default_llm_api_base(),
            api_key_env: default_llm_api_key_env(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_retries: default_llm_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f64 {
    0.2
}
fn default_top_p() -> f64 {
    1.0
}
fn default_llm_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    600
}
fn default_llm_timeout_secs() -> u64 {
    120
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// OPENAI_MODEL_NAME overrides the configured model.
    pub fn resolved_model(&self) -> String {
        match std::env::var("OPENAI_MODEL_NAME") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => self.model.clone(),
        }
    }

    /// OPENAI_API_BASE overrides the configured endpoint.
    pub fn resolved_api_base(&self) -> String {
        let base = match std::env::var("OPENAI_API_BASE") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => self.api_base.clone(),
        };
        base.trim().trim_end_matches('/').to_string()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            api_base: None,
            api_key_env: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
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

    /// EMBEDDING_MODEL_NAME overrides the configured model.
    pub fn resolved_model(&self) -> Option<String> {
        match std::env::var("EMBEDDING_MODEL_NAME") {
            Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
            _ => self.model.clone(),
        }
    }

    /// EMBEDDING_NIM_ENDPOINT overrides the configured endpoint for nim.
    pub fn resolved_api_base(&self) -> Option<String> {
        if self.provider == "nim" {
            if let Ok(v) = std::env::var("EMBEDDING_NIM_ENDPOINT") {
                if !v.trim().is_empty() {
                    return Some(v.trim().trim_end_matches('/').to_string());
                }
            }
        }
        match &self.api_base {
            Some(v) if !v.trim().is_empty() => Some(v.trim().trim_end_matches('/').to_string()),
            _ if self.provider == "openai" => Some("https://api.openai.com/v1".to_string()),
            _ => None,
        }
    }

    /// Env var holding the API key; self-hosted nim endpoints may leave it unset.
    pub fn api_key_env_name(&self) -> &str {
        match &self.api_key_env {
            Some(name) if !name.is_empty() => name,
            _ if self.provider == "nim" => "NVIDIA_API_KEY",
            _ => "OPENAI_API_KEY",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_limit: default_final_limit(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    12
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate ingest globs
    for pattern in config
        .ingest
        .include_globs
        .iter()
        .chain(config.ingest.exclude_globs.iter())
    {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid glob pattern in [ingest]: '{}'", pattern))?;
    }

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    // Validate retrieval
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.resolved_model().is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}' (or set EMBEDDING_MODEL_NAME)",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "nim" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or nim.",
            other
        ),
    }

    Ok(config)
}
