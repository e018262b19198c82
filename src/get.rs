//! Single-document inspection: metadata, extraction state, entity counts.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

pub async fn run_get(config: &Config, id: &str, show_chunks: bool) -> Result<()> {
    let pool = db::connect(config).await?;

    let doc_row = sqlx::query(
        "SELECT id, source, source_id, title, content_type, created_at, updated_at, metadata_json
         FROM documents WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?;

    let Some(doc) = doc_row else {
        println!("Not found: {}", id);
        pool.close().await;
        return Ok(());
    };

    let created_at: i64 = doc.get("created_at");
    let updated_at: i64 = doc.get("updated_at");
    let title: Option<String> = doc.get("title");
    let metadata_json: String = doc.get("metadata_json");
    let metadata: serde_json::Value =
        serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({}));

    // Page numbers are only known for imported element documents.
    let max_page: Option<i64> =
        sqlx::query_scalar("SELECT MAX(page) FROM chunks WHERE document_id = ? AND page >= 0")
            .bind(id)
            .fetch_one(&pool)
            .await?;

    println!("--- Document ---");
    println!("id:           {}", id);
    println!("title:        {}", title.as_deref().unwrap_or("(untitled)"));
    println!("source:       {}", doc.get::<String, _>("source"));
    println!("source_id:    {}", doc.get::<String, _>("source_id"));
    println!("content_type: {}", doc.get::<String, _>("content_type"));
    println!("created_at:   {}", format_ts_iso(created_at));
    println!("updated_at:   {}", format_ts_iso(updated_at));
    if let Some(pages) = max_page {
        println!("pages:        {}", pages);
    }
    println!("metadata:     {}", metadata);
    println!();

    let extraction = sqlx::query(
        "SELECT state_json, status, chunks_total, chunks_merged, model FROM extractions
         WHERE document_id = ?",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?;

    println!("--- Extraction ---");
    match extraction {
        Some(row) => {
            let status: String = row.get("status");
            let total: i64 = row.get("chunks_total");
            let merged: i64 = row.get("chunks_merged");
            let model: String = row.get("model");
            println!("status:       {} ({}/{} chunks, model {})", status, merged, total, model);

            let state_json: String = row.get("state_json");
            match serde_json::from_str::<serde_json::Value>(&state_json) {
                Ok(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                Err(_) => println!("{}", state_json),
            }
        }
        None => println!("status:       none"),
    }
    println!();

    let entity_counts: Vec<(String, i64)> = sqlx::query_as(
        "SELECT collection, COUNT(*) FROM entities WHERE document_id = ?
         GROUP BY collection ORDER BY collection",
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    println!("--- Entities ---");
    if entity_counts.is_empty() {
        println!("  none");
    } else {
        for (collection, count) in &entity_counts {
            println!("  {}: {}", collection, count);
        }
    }

    if show_chunks {
        let chunk_rows = sqlx::query(
            "SELECT chunk_index, page, text FROM chunks WHERE document_id = ? ORDER BY chunk_index",
        )
        .bind(id)
        .fetch_all(&pool)
        .await?;

        println!();
        println!("--- Chunks ({}) ---", chunk_rows.len());
        for row in &chunk_rows {
            let index: i64 = row.get("chunk_index");
            let page: i64 = row.get("page");
            if page >= 0 {
                println!("[chunk {} / page {}]", index, page);
            } else {
                println!("[chunk {}]", index);
            }
            println!("{}", row.get::<String, _>("text"));
            println!();
        }
    }

    pool.close().await;
    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
