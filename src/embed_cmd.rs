//! The `embed` command: backfill or rebuild vectors for chunks and entities.
//!
//! Chunks re-embed when their text hash or the configured model changed.
//! Entity rows are replaced wholesale at harvest time, so for them only
//! missing vectors (or a model switch) count as pending.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use tracing::warn;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::models::Chunk;
use crate::progress::{ProgressEvent, ProgressMode};

#[derive(sqlx::FromRow)]
struct PendingChunk {
    id: String,
    document_id: String,
    text: String,
    hash: String,
}

#[derive(sqlx::FromRow)]
struct PendingEntity {
    id: String,
    document_id: String,
    collection: String,
    text: String,
}

pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_override: Option<usize>,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<()> {
    let provider = require_provider(config)?;
    let model = provider.model_name().to_string();
    let pool = db::connect(config).await?;

    let chunks = find_pending_chunks(&pool, &model, limit).await?;
    let entity_limit = limit.map(|l| l.saturating_sub(chunks.len()));
    let entities = find_pending_entities(&pool, &model, entity_limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing vectors: {}", chunks.len());
        println!("  entities needing vectors: {}", entities.len());
        pool.close().await;
        return Ok(());
    }

    if chunks.is_empty() && entities.is_empty() {
        println!("embed pending");
        println!("  all vectors up to date");
        println!("ok");
        pool.close().await;
        return Ok(());
    }

    let stats = embed_backlog(
        config,
        &pool,
        provider.as_ref(),
        &chunks,
        &entities,
        batch_override,
        progress,
    )
    .await?;

    println!("embed pending");
    println!("  chunks pending: {}", chunks.len());
    println!("  chunks embedded: {}", stats.chunks_embedded);
    println!("  entities pending: {}", entities.len());
    println!("  entities embedded: {}", stats.entities_embedded);
    println!("  failed: {}", stats.failed);
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Drops every stored vector and re-embeds from scratch. Use after switching
/// embedding models.
pub async fn run_embed_rebuild(
    config: &Config,
    batch_override: Option<usize>,
    progress: ProgressMode,
) -> Result<()> {
    let provider = require_provider(config)?;
    let model = provider.model_name().to_string();
    let pool = db::connect(config).await?;

    sqlx::query("DELETE FROM chunk_vectors").execute(&pool).await?;
    sqlx::query("DELETE FROM entity_vectors").execute(&pool).await?;

    let chunks = find_pending_chunks(&pool, &model, None).await?;
    let entities = find_pending_entities(&pool, &model, None).await?;
    let stats = embed_backlog(
        config,
        &pool,
        provider.as_ref(),
        &chunks,
        &entities,
        batch_override,
        progress,
    )
    .await?;

    println!("embed rebuild");
    println!("  cleared existing vectors");
    println!("  chunks embedded: {}", stats.chunks_embedded);
    println!("  entities embedded: {}", stats.entities_embedded);
    println!("  failed: {}", stats.failed);
    println!("ok");

    pool.close().await;
    Ok(())
}

fn require_provider(config: &Config) -> Result<Box<dyn EmbeddingProvider>> {
    if !config.embedding.is_enabled() {
        bail!(
            "Embedding provider is disabled; set [embedding] provider = \"openai\" or \"nim\" in the config"
        );
    }
    embedding::create_provider(&config.embedding)
}

#[derive(Default)]
struct BacklogStats {
    chunks_embedded: u64,
    entities_embedded: u64,
    failed: u64,
}

async fn embed_backlog(
    config: &Config,
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
    chunks: &[PendingChunk],
    entities: &[PendingEntity],
    batch_override: Option<usize>,
    progress: ProgressMode,
) -> Result<BacklogStats> {
    let reporter = progress.reporter();
    let batch_size = batch_override.unwrap_or(config.embedding.batch_size).max(1);
    let total = (chunks.len() + entities.len()) as u64;
    let mut stats = BacklogStats::default();
    let mut done = 0u64;

    for batch in chunks.chunks(batch_size) {
        done += batch.len() as u64;
        reporter.report(ProgressEvent::Embedding { n: done, total });

        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        match embedding::embed_texts(provider, &config.embedding, &texts).await {
            Ok(vectors) => {
                for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                    upsert_chunk_vector(
                        pool,
                        &chunk.id,
                        &chunk.document_id,
                        &chunk.hash,
                        provider.model_name(),
                        vector,
                    )
                    .await?;
                }
                stats.chunks_embedded += batch.len() as u64;
            }
            Err(e) => {
                warn!(error = %e, "chunk embedding batch failed");
                stats.failed += batch.len() as u64;
            }
        }
    }

    for batch in entities.chunks(batch_size) {
        done += batch.len() as u64;
        reporter.report(ProgressEvent::Embedding { n: done, total });

        let texts: Vec<String> = batch.iter().map(|e| e.text.clone()).collect();
        match embedding::embed_texts(provider, &config.embedding, &texts).await {
            Ok(vectors) => {
                for (entity, vector) in batch.iter().zip(vectors.iter()) {
                    upsert_entity_vector(pool, entity, provider.model_name(), vector).await?;
                }
                stats.entities_embedded += batch.len() as u64;
            }
            Err(e) => {
                warn!(error = %e, "entity embedding batch failed");
                stats.failed += batch.len() as u64;
            }
        }
    }

    Ok(stats)
}

/// Embeds freshly written chunks during ingest. Failures are non-fatal: the
/// chunks stay pending for a later `rfx embed pending`. Returns
/// `(embedded, pending)`.
pub async fn embed_chunks_inline(
    config: &Config,
    pool: &SqlitePool,
    chunks: &[Chunk],
) -> (u64, u64) {
    if !config.embedding.is_enabled() || chunks.is_empty() {
        return (0, chunks.len() as u64);
    }
    let provider = match embedding::create_provider(&config.embedding) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "embedding provider unavailable");
            return (0, chunks.len() as u64);
        }
    };

    let mut embedded = 0u64;
    let mut pending = 0u64;
    let batch_size = config.embedding.batch_size.max(1);

    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        match embedding::embed_texts(provider.as_ref(), &config.embedding, &texts).await {
            Ok(vectors) => {
                for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                    let written = upsert_chunk_vector(
                        pool,
                        &chunk.id,
                        &chunk.document_id,
                        &chunk.hash,
                        provider.model_name(),
                        vector,
                    )
                    .await;
                    match written {
                        Ok(()) => embedded += 1,
                        Err(e) => {
                            warn!(chunk = %chunk.id, error = %e, "vector upsert failed");
                            pending += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "inline embedding batch failed");
                pending += batch.len() as u64;
            }
        }
    }

    (embedded, pending)
}

async fn find_pending_chunks(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingChunk>> {
    let mut sql = String::from(
        "SELECT c.id, c.document_id, c.text, c.hash
         FROM chunks c
         LEFT JOIN chunk_vectors v ON v.chunk_id = c.id
         WHERE v.chunk_id IS NULL OR v.hash != c.hash OR v.model != ?
         ORDER BY c.document_id, c.chunk_index",
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    let rows = sqlx::query_as::<_, PendingChunk>(&sql)
        .bind(model)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

async fn find_pending_entities(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingEntity>> {
    if limit == Some(0) {
        return Ok(Vec::new());
    }
    let mut sql = String::from(
        "SELECT e.id, e.document_id, e.collection, e.text
         FROM entities e
         LEFT JOIN entity_vectors v ON v.entity_id = e.id
         WHERE v.entity_id IS NULL OR v.model != ?
         ORDER BY e.document_id, e.collection, e.id",
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    let rows = sqlx::query_as::<_, PendingEntity>(&sql)
        .bind(model)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

async fn upsert_chunk_vector(
    pool: &SqlitePool,
    chunk_id: &str,
    document_id: &str,
    hash: &str,
    model: &str,
    vector: &[f32],
) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO chunk_vectors
         (chunk_id, document_id, model, dims, embedding, hash, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(chunk_id)
    .bind(document_id)
    .bind(model)
    .bind(vector.len() as i64)
    .bind(embedding::vec_to_blob(vector))
    .bind(hash)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_entity_vector(
    pool: &SqlitePool,
    entity: &PendingEntity,
    model: &str,
    vector: &[f32],
) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO entity_vectors
         (entity_id, document_id, collection, model, dims, embedding, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entity.id)
    .bind(&entity.document_id)
    .bind(&entity.collection)
    .bind(model)
    .bind(vector.len() as i64)
    .bind(embedding::vec_to_blob(vector))
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}
