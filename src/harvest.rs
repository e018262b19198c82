//! The harvest loop: merge-extraction of entities across a document's chunks.
//!
//! One document is processed chunk by chunk in order. Each call hands the
//! model the running state plus the next chunk; the reply is sanitized,
//! validated against the schema (with retries that feed the failure back to
//! the model), then evidence-filtered against the chunk before it replaces
//! the running state. A chunk that fails all retries is skipped; the run is
//! recorded as `partial` and a later harvest resumes from the stored state.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, warn};

use crate::collections;
use crate::config::Config;
use crate::dates;
use crate::db;
use crate::embedding;
use crate::evidence;
use crate::llm::{self, ChatModel};
use crate::progress::{ProgressEvent, ProgressMode, ProgressReporter};
use crate::prompt;
use crate::sanitize;
use crate::schema::ExtractionState;

pub struct HarvestOutcome {
    pub status: &'static str,
    pub chunks_total: usize,
    pub chunks_merged: usize,
    pub entities: usize,
    pub entities_embedded: usize,
}

pub async fn run_harvest(
    config: &Config,
    document_id: Option<&str>,
    all: bool,
    force: bool,
    progress: ProgressMode,
) -> Result<()> {
    if !config.llm.is_enabled() {
        println!(
            "LLM provider is disabled. Set [llm] provider = \"openai\" in the config and export OPENAI_API_KEY to enable harvesting."
        );
        return Ok(());
    }
    let pool = db::connect(config).await?;
    let reporter = progress.reporter();

    let targets: Vec<String> = if let Some(id) = document_id {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&pool)
            .await?;
        match exists {
            Some(found) => vec![found],
            None => {
                println!("Not found: {}", id);
                pool.close().await;
                return Ok(());
            }
        }
    } else if all {
        let sql = if force {
            "SELECT id FROM documents ORDER BY updated_at DESC"
        } else {
            // Documents never harvested, or whose last run did not finish.
            "SELECT d.id FROM documents d
             LEFT JOIN extractions e ON e.document_id = d.id
             WHERE e.document_id IS NULL OR e.status != 'complete'
             ORDER BY d.updated_at DESC"
        };
        sqlx::query_scalar(sql).fetch_all(&pool).await?
    } else {
        bail!("harvest requires a document id or --all");
    };

    if targets.is_empty() {
        println!("harvest");
        println!("  documents pending: 0");
        println!("ok");
        pool.close().await;
        return Ok(());
    }

    // The chat model is only needed once there is work to do.
    let model = llm::create_chat_model(&config.llm)?;

    println!("harvest");
    let mut complete = 0u64;
    let mut partial = 0u64;
    let mut failed = 0u64;
    let mut entities_total = 0usize;
    let mut embedded_total = 0usize;

    for id in &targets {
        match harvest_document(&pool, config, model.as_ref(), id, force, reporter.as_ref()).await {
            Ok(outcome) => {
                println!(
                    "  {}: {} ({}/{} chunks, {} entities)",
                    id, outcome.status, outcome.chunks_merged, outcome.chunks_total, outcome.entities
                );
                match outcome.status {
                    "complete" => complete += 1,
                    "partial" => partial += 1,
                    _ => failed += 1,
                }
                entities_total += outcome.entities;
                embedded_total += outcome.entities_embedded;
            }
            Err(e) => {
                warn!(document = %id, error = %e, "harvest failed");
                println!("  {}: error ({:#})", id, e);
                failed += 1;
            }
        }
    }

    println!("  documents harvested: {}", targets.len());
    println!("  complete: {}", complete);
    println!("  partial: {}", partial);
    println!("  failed: {}", failed);
    println!("  entities written: {}", entities_total);
    if config.embedding.is_enabled() {
        println!("  entity embeddings written: {}", embedded_total);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Harvests one document and stores the extraction row and entity rows.
/// Without `force`, resumes from any previously stored state so a partial
/// run picks up where it stopped re-verifying nothing it already holds.
pub async fn harvest_document(
    pool: &SqlitePool,
    config: &Config,
    model: &dyn ChatModel,
    document_id: &str,
    force: bool,
    reporter: &dyn ProgressReporter,
) -> Result<HarvestOutcome> {
    let chunks: Vec<(i64, String)> = sqlx::query_as(
        "SELECT chunk_index, text FROM chunks WHERE document_id = ? ORDER BY chunk_index",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    let mut state = if force {
        ExtractionState::default()
    } else {
        stored_state(pool, document_id).await?.unwrap_or_default()
    };

    let schema = ExtractionState::schema_json();
    let system_base = prompt::build_system_prompt(&schema);
    let total = chunks.len();
    let mut merged_count = 0usize;

    for (i, (_, text)) in chunks.iter().enumerate() {
        reporter.report(ProgressEvent::Harvesting {
            document: document_id.to_string(),
            chunk: (i + 1) as u64,
            chunks: total as u64,
        });
        let unresolved = state.unresolved_fields();
        let user = prompt::build_user_prompt(&state, text, &unresolved);
        match invoke_with_retries(
            model,
            &system_base,
            &user,
            config.llm.max_retries,
            config.llm.retry_backoff_ms,
        )
        .await
        {
            Ok(payload) => {
                let (merged, decisions) = evidence::merge_with_evidence(&payload, text, &state);
                for line in &decisions {
                    debug!(document = document_id, chunk = i, "{}", line);
                }
                state = merged;
                merged_count += 1;
            }
            Err(e) => {
                warn!(
                    document = document_id,
                    chunk = i,
                    error = %e,
                    "extraction failed after retries; chunk skipped"
                );
            }
        }
    }

    let status = if merged_count == total {
        "complete"
    } else if merged_count > 0 {
        "partial"
    } else {
        "failed"
    };

    let state_json = serde_json::to_string(&state).context("Failed to serialize extraction state")?;
    sqlx::query(
        r#"
        INSERT INTO extractions (document_id, state_json, status, chunks_total, chunks_merged, model, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(document_id) DO UPDATE SET
            state_json = excluded.state_json,
            status = excluded.status,
            chunks_total = excluded.chunks_total,
            chunks_merged = excluded.chunks_merged,
            model = excluded.model,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(document_id)
    .bind(&state_json)
    .bind(status)
    .bind(total as i64)
    .bind(merged_count as i64)
    .bind(model.model_name())
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;

    let entities = collections::store_entities(pool, document_id, &state).await?;

    // Inline entity embedding is best-effort; `rfx embed pending` covers gaps.
    let mut entities_embedded = 0usize;
    if config.embedding.is_enabled() {
        match embedding::create_provider(&config.embedding) {
            Ok(provider) => {
                match collections::embed_document_entities(
                    pool,
                    provider.as_ref(),
                    &config.embedding,
                    document_id,
                )
                .await
                {
                    Ok(n) => entities_embedded = n,
                    Err(e) => warn!(document = document_id, error = %e, "entity embedding failed"),
                }
            }
            Err(e) => warn!(error = %e, "embedding provider unavailable"),
        }
    }

    Ok(HarvestOutcome {
        status,
        chunks_total: total,
        chunks_merged: merged_count,
        entities,
        entities_embedded,
    })
}

async fn stored_state(pool: &SqlitePool, document_id: &str) -> Result<Option<ExtractionState>> {
    let raw: Option<String> =
        sqlx::query_scalar("SELECT state_json FROM extractions WHERE document_id = ?")
            .bind(document_id)
            .fetch_optional(pool)
            .await?;
    match raw {
        Some(raw) => {
            let state =
                serde_json::from_str(&raw).context("Stored extraction state is corrupt")?;
            Ok(Some(state))
        }
        None => Ok(None),
    }
}

/// One model exchange with validation retries. On each retry the previous
/// failure is appended to the system prompt so the model can correct itself.
pub async fn invoke_with_retries(
    model: &dyn ChatModel,
    system_base: &str,
    user: &str,
    max_retries: u32,
    backoff_ms: u64,
) -> Result<ExtractionState> {
    let mut last_err: Option<String> = None;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(backoff_ms * attempt as u64)).await;
        }
        let system = format!("{}{}", system_base, prompt::error_addendum(last_err.as_deref()));
        match attempt_extraction(model, &system, user).await {
            Ok(state) => return Ok(state),
            Err(message) => {
                debug!(attempt = attempt + 1, error = %message, "extraction attempt failed");
                last_err = Some(message);
            }
        }
    }
    Err(anyhow!(last_err.unwrap_or_else(|| "extraction failed".to_string())))
}

/// One attempt: complete, slice out the JSON object, sanitize, validate.
/// Errors are strings shaped for the model to read on retry.
async fn attempt_extraction(
    model: &dyn ChatModel,
    system: &str,
    user: &str,
) -> Result<ExtractionState, String> {
    let reply = model
        .complete(system, user)
        .await
        .map_err(|e| format!("Request error: {e:#}"))?;
    let raw = extract_json_between_braces(&reply)
        .ok_or_else(|| "No valid JSON object found in the reply".to_string())?;
    let value: Value =
        serde_json::from_str(raw).map_err(|e| format!("JSON decoding error: {e}"))?;
    let sanitized = sanitize::sanitize_payload(value);
    let mut state: ExtractionState = serde_json::from_value(sanitized)
        .map_err(|e| format!("Schema validation error(s): {e}"))?;
    // A deadline whose date is not date-shaped can never be evidenced.
    state.deadlines.retain(|d| dates::contains_date(&d.date));
    Ok(state)
}

/// The model is told to return bare JSON but often wraps it in prose or code
/// fences. Slice from the first '{' to the last '}' and parse that.
fn extract_json_between_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
