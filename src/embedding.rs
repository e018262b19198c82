//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are not configured.
//! - **[`RemoteProvider`]** — calls an OpenAI-compatible or NVIDIA NIM
//!   embeddings endpoint with batching, retry, and backoff.
//!
//! Also provides vector utilities for BLOB-backed similarity search:
//! - [`cosine_similarity`] — compute similarity between two embedding vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`] — decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust,no_run
//! # use rfx_harvest::config::EmbeddingConfig;
//! # use rfx_harvest::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! Remote providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Distinguishes document-side from query-side embedding. NIM retrieval
/// models are asymmetric and need to know which side they are encoding;
/// OpenAI-compatible endpoints ignore the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedPurpose {
    Passage,
    Query,
}

impl EmbedPurpose {
    fn as_input_type(&self) -> &'static str {
        match self {
            EmbedPurpose::Passage => "passage",
            EmbedPurpose::Query => "query",
        }
    }
}

/// Trait for embedding providers.
///
/// The actual HTTP work is performed by [`embed_texts`] and [`embed_query`]
/// (kept as free functions due to async trait limitations); providers carry
/// the connection details and metadata.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"nvidia/nv-embedqa-e5-v5"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1024`).
    fn dims(&self) -> usize;
}

/// Embed a batch of texts as passages (document side).
///
/// Splits the input into `config.batch_size` slices and issues one request
/// per slice, preserving input order in the output.
///
/// # Errors
///
/// - `"disabled"` provider: always returns an error.
/// - Remote providers: returns an error if the API key is missing, the API
///   returns a non-retryable error, all retries are exhausted, or a returned
///   vector does not match the configured dimensionality.
pub async fn embed_texts(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    embed_with_purpose(provider, config, texts, EmbedPurpose::Passage).await
}

/// Embed a single query text (query side, for search).
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    text: &str,
) -> Result<Vec<f32>> {
    let results =
        embed_with_purpose(provider, config, &[text.to_string()], EmbedPurpose::Query).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

async fn embed_with_purpose(
    _provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    texts: &[String],
    purpose: EmbedPurpose,
) -> Result<Vec<Vec<f32>>> {
    match config.provider.as_str() {
        "openai" | "nim" => embed_remote(config, texts, purpose).await,
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ Remote Providers ============

/// Embedding provider backed by an HTTP embeddings endpoint.
///
/// Two dialects of the same `POST /embeddings` shape:
/// - `"openai"` — api.openai.com or any compatible server.
/// - `"nim"` — NVIDIA NIM retrieval models, which additionally take
///   `input_type` ("passage"/"query") and `truncate`.
pub struct RemoteProvider {
    model: String,
    dims: usize,
}

impl RemoteProvider {
    /// Create a remote provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config, or if the
    /// configured API key variable is not in the environment (NIM endpoints
    /// may run keyless on a local network, so only `"openai"` requires one).
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .resolved_model()
            .ok_or_else(|| anyhow!("embedding.model required for provider {:?}", config.provider))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for provider {:?}", config.provider))?;

        if config.provider == "openai" && std::env::var(config.api_key_env_name()).is_err() {
            bail!(
                "{} environment variable not set",
                config.api_key_env_name()
            );
        }

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for RemoteProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

/// Request body for one embeddings call. NIM needs the retrieval-side hints;
/// OpenAI-compatible servers reject unknown fields, so they are only added
/// for the NIM dialect.
fn request_body(provider: &str, model: &str, texts: &[String], purpose: EmbedPurpose) -> Value {
    let mut body = json!({
        "model": model,
        "input": texts,
    });
    if provider == "nim" {
        body["input_type"] = json!(purpose.as_input_type());
        body["truncate"] = json!("END");
    }
    body
}

/// Call the embeddings endpoint with batching and retry/backoff.
async fn embed_remote(
    config: &EmbeddingConfig,
    texts: &[String],
    purpose: EmbedPurpose,
) -> Result<Vec<Vec<f32>>> {
    let model = config.resolved_model().ok_or_else(|| anyhow!("embedding.model required"))?;
    let dims = config.dims.ok_or_else(|| anyhow!("embedding.dims required"))?;
    let api_key = std::env::var(config.api_key_env_name()).ok();
    if config.provider == "openai" && api_key.is_none() {
        bail!("{} environment variable not set", config.api_key_env_name());
    }
    let api_base = config
        .resolved_api_base()
        .ok_or_else(|| anyhow!("embedding.api_base required for provider {:?}", config.provider))?;
    let url = format!("{}/embeddings", api_base);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let batch_size = config.batch_size.max(1);
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        let body = request_body(&config.provider, &model, batch, purpose);
        let response =
            request_with_retries(&client, &url, api_key.as_deref(), &body, config.max_retries)
                .await?;
        let vectors = parse_embeddings_response(&response)?;
        if vectors.len() != batch.len() {
            bail!(
                "Embedding response size mismatch: sent {} texts, got {} vectors",
                batch.len(),
                vectors.len()
            );
        }
        for v in &vectors {
            if v.len() != dims {
                bail!(
                    "Embedding dimensionality mismatch: expected {}, got {} (check embedding.dims)",
                    dims,
                    v.len()
                );
            }
        }
        out.extend(vectors);
    }
    Ok(out)
}

async fn request_with_retries(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    body: &Value,
    max_retries: u32,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .context("Embedding response was not valid JSON");
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow!("Embedding API error {}: {}", status, body_text));
                    continue;
                }

                // Client error (not 429): don't retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("Embedding API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
}

/// Parse an embeddings API response, returning vectors in input order.
fn parse_embeddings_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid embedding response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid embedding response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        indexed.push((index, vec));
    }

    // Servers may stream results out of order; restore input order.
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`RemoteProvider`] |
/// | `"nim"` | [`RemoteProvider`] |
///
/// # Errors
///
/// Returns an error for unknown provider names or if a remote provider
/// cannot be initialized (missing config or API key).
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" | "nim" => Ok(Box::new(RemoteProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use rfx_harvest::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Returns `0.0` for empty vectors or
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
