//! The `docs` command: one-line-per-document inventory.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

pub async fn run_docs(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let rows = sqlx::query(
        r#"
        SELECT d.id, d.title, d.source_id,
               (SELECT COUNT(*) FROM chunks c WHERE c.document_id = d.id) AS chunk_count,
               (SELECT COUNT(*) FROM entities en WHERE en.document_id = d.id) AS entity_count,
               e.status AS status, e.state_json AS state_json
        FROM documents d
        LEFT JOIN extractions e ON e.document_id = d.id
        ORDER BY d.updated_at DESC, d.id ASC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if rows.is_empty() {
        println!("No documents.");
        pool.close().await;
        return Ok(());
    }

    println!(
        "  {:<10} {:<15} {:<40} {:>6} {:>8}  {}",
        "ID", "TYPE", "TITLE", "CHUNKS", "ENTITIES", "STATUS"
    );
    println!("  {}", "-".repeat(92));

    for row in &rows {
        let id: String = row.get("id");
        let title: Option<String> = row.get("title");
        let source_id: String = row.get("source_id");
        let status: Option<String> = row.get("status");
        let state_json: Option<String> = row.get("state_json");

        let doc_type = state_json
            .as_deref()
            .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
            .and_then(|v| v["document_type"].as_str().map(str::to_string))
            .unwrap_or_else(|| "-".to_string());

        let display_title = title.unwrap_or_else(|| {
            std::path::Path::new(&source_id)
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or(source_id.clone())
        });

        println!(
            "  {:<10} {:<15} {:<40} {:>6} {:>8}  {}",
            short_id(&id),
            truncate(&doc_type, 15),
            truncate(&display_title, 40),
            row.get::<i64, _>("chunk_count"),
            row.get::<i64, _>("entity_count"),
            status.as_deref().unwrap_or("-")
        );
    }

    pool.close().await;
    Ok(())
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
