//! Database statistics and health overview.
//!
//! Quick summary of what's indexed: document and chunk counts, embedding
//! coverage, entity rows per collection, and extraction progress. Used by
//! `rfx stats` to confirm that ingest, harvest, and embedding are keeping up.

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;
    let total_embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(&pool)
        .await?;
    let total_entities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
        .fetch_one(&pool)
        .await?;

    let entity_counts: Vec<(String, i64)> = sqlx::query_as(
        "SELECT collection, COUNT(*) FROM entities GROUP BY collection ORDER BY collection",
    )
    .fetch_all(&pool)
    .await?;

    let extraction_counts: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM extractions GROUP BY status ORDER BY status",
    )
    .fetch_all(&pool)
    .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("RFX Harvest — Database Stats");
    println!("============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", total_docs);
    println!("  Chunks:      {}", total_chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        total_embedded,
        total_chunks,
        if total_chunks > 0 {
            (total_embedded * 100) / total_chunks
        } else {
            0
        }
    );
    println!("  Entities:    {}", total_entities);

    if !entity_counts.is_empty() {
        println!();
        println!("  By collection:");
        for (collection, count) in &entity_counts {
            println!("  {:<16} {:>6}", collection, count);
        }
    }

    if !extraction_counts.is_empty() {
        println!();
        println!("  Extractions:");
        for (status, count) in &extraction_counts {
            println!("  {:<16} {:>6}", status, count);
        }
    }

    println!();
    println!("  LLM:         {}", provider_display(&config.llm.provider, Some(config.llm.resolved_model())));
    println!(
        "  Embedding:   {}",
        provider_display(&config.embedding.provider, config.embedding.resolved_model())
    );
    println!();

    pool.close().await;
    Ok(())
}

fn provider_display(provider: &str, model: Option<String>) -> String {
    if provider == "disabled" {
        return "disabled".to_string();
    }
    match model {
        Some(m) => format!("{} / {}", provider, m),
        None => provider.to_string(),
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
