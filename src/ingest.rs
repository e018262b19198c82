//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow from solicitation files to searchable rows: scan →
//! extract → dedup → chunk → embed → harvest. Unchanged files (by content
//! hash) are skipped unless `--full` forces a re-ingest. Also imports
//! pre-parsed element JSON produced by external document pipelines.

use anyhow::{Context, Result};
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::db;
use crate::elements;
use crate::embed_cmd;
use crate::extract;
use crate::harvest;
use crate::llm;
use crate::models::{Chunk, NewDocument};
use crate::progress::{ProgressEvent, ProgressMode};
use crate::scan;

pub async fn run_ingest(
    config: &Config,
    paths: &[String],
    full: bool,
    dry_run: bool,
    limit: Option<usize>,
    skip_harvest: bool,
    progress: ProgressMode,
) -> Result<()> {
    let reporter = progress.reporter();
    reporter.report(ProgressEvent::Scanning);

    let mut files = scan::collect_files(config, paths)?;
    if let Some(lim) = limit {
        files.truncate(lim);
    }

    if dry_run {
        let total_bytes: u64 = files.iter().map(|f| f.size).sum();
        println!("ingest (dry-run)");
        println!("  files found: {}", files.len());
        println!("  total bytes: {}", total_bytes);
        return Ok(());
    }

    let pool = db::connect(config).await?;

    let mut docs_upserted = 0u64;
    let mut docs_unchanged = 0u64;
    let mut extraction_skipped = 0u64;
    let mut chunks_written = 0u64;
    let mut embeddings_written = 0u64;
    let mut embeddings_pending = 0u64;
    let mut harvest_targets: Vec<String> = Vec::new();

    let total = files.len() as u64;
    for (i, file) in files.iter().enumerate() {
        reporter.report(ProgressEvent::Ingesting {
            n: (i + 1) as u64,
            total,
            path: file.relative.clone(),
        });

        if file.size > config.ingest.max_extract_bytes {
            warn!(
                path = %file.path.display(),
                size = file.size,
                cap = config.ingest.max_extract_bytes,
                "file exceeds max_extract_bytes; skipped"
            );
            extraction_skipped += 1;
            continue;
        }

        let bytes = std::fs::read(&file.path)
            .with_context(|| format!("Failed to read {}", file.path.display()))?;

        let extracted = match extract::extract_file(&file.path, &bytes) {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "extraction failed; skipped");
                extraction_skipped += 1;
                continue;
            }
        };

        let dedup_hash = hash_bytes(&bytes);
        let existing: Option<(String, String)> = sqlx::query_as(
            "SELECT id, dedup_hash FROM documents WHERE source = 'file' AND source_id = ?",
        )
        .bind(&file.relative)
        .fetch_optional(&pool)
        .await?;

        if let Some((_, ref old_hash)) = existing {
            if *old_hash == dedup_hash && !full {
                docs_unchanged += 1;
                continue;
            }
        }

        let doc = NewDocument {
            source: "file".to_string(),
            source_id: file.relative.clone(),
            content_type: extracted.content_type.to_string(),
            title: file
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string()),
            body: extracted.text,
            metadata_json: json!({
                "path": file.path.display().to_string(),
                "size": file.size,
            })
            .to_string(),
        };
        let doc_id = upsert_document(&pool, &doc, &dedup_hash, existing.map(|(id, _)| id)).await?;

        let chunks = chunk_text(
            &doc_id,
            &doc.body,
            config.chunking.max_tokens,
            config.chunking.overlap_tokens,
        );
        replace_chunks(&pool, &doc_id, &chunks).await?;
        chunks_written += chunks.len() as u64;
        docs_upserted += 1;

        let (emb_ok, emb_pending) = embed_cmd::embed_chunks_inline(config, &pool, &chunks).await;
        embeddings_written += emb_ok;
        embeddings_pending += emb_pending;

        harvest_targets.push(doc_id);
    }

    let docs_harvested =
        harvest_ingested(config, &pool, &harvest_targets, skip_harvest, &*reporter).await;

    println!("ingest");
    println!("  scanned files: {}", files.len());
    println!("  upserted documents: {}", docs_upserted);
    println!("  unchanged documents: {}", docs_unchanged);
    println!("  extraction skipped: {}", extraction_skipped);
    println!("  chunks written: {}", chunks_written);
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", embeddings_written);
        println!("  embeddings pending: {}", embeddings_pending);
    }
    if config.llm.is_enabled() && !skip_harvest {
        println!("  documents harvested: {}", docs_harvested);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Imports element JSON files: each input file holds the parsed elements of
/// one or more documents (text blocks, tables, image captions, transcripts)
/// with page geometry. Bodies are assembled in reading order and chunked one
/// element per chunk so page numbers survive.
pub async fn run_import(
    config: &Config,
    paths: &[String],
    full: bool,
    dry_run: bool,
    limit: Option<usize>,
    skip_harvest: bool,
    progress: ProgressMode,
) -> Result<()> {
    let reporter = progress.reporter();

    // Parse everything up front; imports are small compared to raw files.
    let mut parsed: Vec<(String, String, Vec<elements::Element>)> = Vec::new();
    for path in paths {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path))?;
        let documents = elements::parse_results(&raw)
            .with_context(|| format!("Failed to parse element JSON in {}", path))?;
        let stem = std::path::Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());
        for (idx, doc_elements) in documents.into_iter().enumerate() {
            let source_id = elements::primary_source_id(&doc_elements)
                .unwrap_or_else(|| format!("{}#{}", stem, idx));
            parsed.push((path.clone(), source_id, doc_elements));
        }
    }
    if let Some(lim) = limit {
        parsed.truncate(lim);
    }

    if dry_run {
        let total_elements: usize = parsed.iter().map(|(_, _, els)| els.len()).sum();
        println!("import (dry-run)");
        println!("  documents found: {}", parsed.len());
        println!("  elements found: {}", total_elements);
        return Ok(());
    }

    let pool = db::connect(config).await?;

    let mut docs_upserted = 0u64;
    let mut docs_unchanged = 0u64;
    let mut docs_empty = 0u64;
    let mut chunks_written = 0u64;
    let mut embeddings_written = 0u64;
    let mut embeddings_pending = 0u64;
    let mut harvest_targets: Vec<String> = Vec::new();

    let total = parsed.len() as u64;
    for (i, (path, source_id, doc_elements)) in parsed.iter().enumerate() {
        reporter.report(ProgressEvent::Ingesting {
            n: (i + 1) as u64,
            total,
            path: path.clone(),
        });

        let body = elements::assemble_blob(doc_elements);
        if body.trim().is_empty() {
            docs_empty += 1;
            continue;
        }
        let dedup_hash = hash_bytes(body.as_bytes());

        let existing: Option<(String, String)> = sqlx::query_as(
            "SELECT id, dedup_hash FROM documents WHERE source = 'import' AND source_id = ?",
        )
        .bind(source_id)
        .fetch_optional(&pool)
        .await?;
        if let Some((_, ref old_hash)) = existing {
            if *old_hash == dedup_hash && !full {
                docs_unchanged += 1;
                continue;
            }
        }

        let title = std::path::Path::new(source_id)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string());
        let doc = NewDocument {
            source: "import".to_string(),
            source_id: source_id.clone(),
            content_type: "text/plain".to_string(),
            title,
            body,
            metadata_json: json!({
                "import_file": path,
                "elements": doc_elements.len(),
            })
            .to_string(),
        };
        let doc_id = upsert_document(&pool, &doc, &dedup_hash, existing.map(|(id, _)| id)).await?;

        // One chunk per text-bearing element keeps page numbers addressable.
        let chunks = elements::element_chunks(&doc_id, doc_elements);
        replace_chunks(&pool, &doc_id, &chunks).await?;
        chunks_written += chunks.len() as u64;
        docs_upserted += 1;

        let (emb_ok, emb_pending) = embed_cmd::embed_chunks_inline(config, &pool, &chunks).await;
        embeddings_written += emb_ok;
        embeddings_pending += emb_pending;

        harvest_targets.push(doc_id);
    }

    let docs_harvested =
        harvest_ingested(config, &pool, &harvest_targets, skip_harvest, &*reporter).await;

    println!("import");
    println!("  documents found: {}", parsed.len());
    println!("  upserted documents: {}", docs_upserted);
    println!("  unchanged documents: {}", docs_unchanged);
    println!("  empty documents: {}", docs_empty);
    println!("  chunks written: {}", chunks_written);
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", embeddings_written);
        println!("  embeddings pending: {}", embeddings_pending);
    }
    if config.llm.is_enabled() && !skip_harvest {
        println!("  documents harvested: {}", docs_harvested);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Harvests freshly ingested documents. Failures are logged, not fatal; a
/// later `rfx harvest --all` retries anything incomplete.
async fn harvest_ingested(
    config: &Config,
    pool: &SqlitePool,
    targets: &[String],
    skip_harvest: bool,
    reporter: &dyn crate::progress::ProgressReporter,
) -> u64 {
    if skip_harvest || targets.is_empty() || !config.llm.is_enabled() {
        return 0;
    }
    let model = match llm::create_chat_model(&config.llm) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "chat model unavailable; skipping harvest");
            return 0;
        }
    };
    let mut harvested = 0u64;
    for doc_id in targets {
        match harvest::harvest_document(pool, config, model.as_ref(), doc_id, false, reporter).await
        {
            Ok(_) => harvested += 1,
            Err(e) => warn!(document = %doc_id, error = %e, "harvest failed"),
        }
    }
    harvested
}

async fn upsert_document(
    pool: &SqlitePool,
    doc: &NewDocument,
    dedup_hash: &str,
    existing_id: Option<String>,
) -> Result<String> {
    let doc_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO documents (id, source, source_id, content_type, title, created_at, updated_at, body, metadata_json, dedup_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source, source_id) DO UPDATE SET
            content_type = excluded.content_type,
            title = excluded.title,
            updated_at = excluded.updated_at,
            body = excluded.body,
            metadata_json = excluded.metadata_json,
            dedup_hash = excluded.dedup_hash
        "#,
    )
    .bind(&doc_id)
    .bind(&doc.source)
    .bind(&doc.source_id)
    .bind(&doc.content_type)
    .bind(&doc.title)
    .bind(now)
    .bind(now)
    .bind(&doc.body)
    .bind(&doc.metadata_json)
    .bind(dedup_hash)
    .execute(pool)
    .await?;

    Ok(doc_id)
}

async fn replace_chunks(pool: &SqlitePool, document_id: &str, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, page, text, hash) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(chunk.page)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
