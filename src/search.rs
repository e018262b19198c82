//! Keyword, semantic, and hybrid retrieval over chunks and entity rows.
//!
//! Keyword candidates come from FTS5 (bm25 rank), semantic candidates from
//! brute-force cosine over the stored vectors. Hybrid blends the min-max
//! normalized scores of both channels; `hybrid_alpha` weights the vector
//! side. Chunk results are grouped per document, entity results print one
//! line per row.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::collections::ENTITY_COLLECTIONS;
use crate::config::Config;
use crate::db;
use crate::embedding;

pub async fn run_search(
    config: &Config,
    query: &str,
    mode: &str,
    collection: &str,
    doc_filter: Option<String>,
    limit: Option<i64>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    match mode {
        "keyword" | "semantic" | "hybrid" => {}
        other => {
            println!(
                "Unknown search mode: {}. Valid modes: keyword, semantic, hybrid.",
                other
            );
            return Ok(());
        }
    }
    if collection != "chunks" && !ENTITY_COLLECTIONS.contains(&collection) {
        println!(
            "Unknown collection: {}. Valid collections: chunks, {}.",
            collection,
            ENTITY_COLLECTIONS.join(", ")
        );
        return Ok(());
    }

    // Degrade gracefully when vectors are unavailable.
    let mode = if config.embedding.is_enabled() {
        mode
    } else {
        match mode {
            "semantic" => {
                println!(
                    "Semantic search requires embeddings; set [embedding] provider = \"openai\" or \"nim\" in the config."
                );
                return Ok(());
            }
            "hybrid" => {
                eprintln!("Warning: embeddings disabled; using keyword search.");
                "keyword"
            }
            other => other,
        }
    };

    let pool = db::connect(config).await?;
    let final_limit = limit.unwrap_or(config.retrieval.final_limit).max(1) as usize;
    let effective_alpha = match mode {
        "keyword" => 0.0,
        "semantic" => 1.0,
        _ => config.retrieval.hybrid_alpha,
    };

    let keyword_candidates = if mode == "keyword" || mode == "hybrid" {
        if collection == "chunks" {
            fetch_chunk_keyword(&pool, query, doc_filter.as_deref(), config.retrieval.candidate_k_keyword).await?
        } else {
            fetch_entity_keyword(&pool, query, collection, doc_filter.as_deref(), config.retrieval.candidate_k_keyword).await?
        }
    } else {
        Vec::new()
    };

    let vector_candidates = if mode == "semantic" || mode == "hybrid" {
        if collection == "chunks" {
            fetch_chunk_vector(&pool, config, query, doc_filter.as_deref(), config.retrieval.candidate_k_vector).await?
        } else {
            fetch_entity_vector(&pool, config, query, collection, doc_filter.as_deref(), config.retrieval.candidate_k_vector).await?
        }
    } else {
        Vec::new()
    };

    if keyword_candidates.is_empty() && vector_candidates.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    let mut blended = blend_scores(&keyword_candidates, &vector_candidates, effective_alpha);
    blended.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.id.cmp(&b.0.id))
    });

    if collection == "chunks" {
        print_document_results(&pool, &blended, final_limit).await?;
    } else {
        print_entity_results(&blended, collection, final_limit);
    }

    pool.close().await;
    Ok(())
}

#[derive(Debug, Clone)]
struct Candidate {
    id: String,
    document_id: String,
    raw_score: f64,
    text: String,
}

/// Quote the user query as an FTS5 phrase so reserved syntax (AND, NEAR,
/// parens) is matched literally. Embedded double quotes are doubled.
fn fts_phrase(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

async fn fetch_chunk_keyword(
    pool: &SqlitePool,
    query: &str,
    doc_filter: Option<&str>,
    candidate_k: i64,
) -> Result<Vec<Candidate>> {
    let mut sql = String::from(
        "SELECT chunks_fts.chunk_id AS id, chunks_fts.document_id AS document_id,
                chunks_fts.rank AS rank,
                snippet(chunks_fts, 2, '>>>', '<<<', '...', 48) AS text
         FROM chunks_fts
         WHERE chunks_fts MATCH ?",
    );
    if doc_filter.is_some() {
        sql.push_str(" AND chunks_fts.document_id = ?");
    }
    sql.push_str(" ORDER BY rank LIMIT ?");

    let mut q = sqlx::query(&sql).bind(fts_phrase(query));
    if let Some(doc) = doc_filter {
        q = q.bind(doc.to_string());
    }
    let rows = q.bind(candidate_k).fetch_all(pool).await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            Candidate {
                id: row.get("id"),
                document_id: row.get("document_id"),
                // bm25 rank is "smaller is better"; negate for descending
                raw_score: -rank,
                text: row.get("text"),
            }
        })
        .collect())
}

async fn fetch_entity_keyword(
    pool: &SqlitePool,
    query: &str,
    collection: &str,
    doc_filter: Option<&str>,
    candidate_k: i64,
) -> Result<Vec<Candidate>> {
    let mut sql = String::from(
        "SELECT entities_fts.entity_id AS id, entities_fts.document_id AS document_id,
                entities_fts.rank AS rank, entities_fts.text AS text
         FROM entities_fts
         WHERE entities_fts MATCH ? AND entities_fts.collection = ?",
    );
    if doc_filter.is_some() {
        sql.push_str(" AND entities_fts.document_id = ?");
    }
    sql.push_str(" ORDER BY rank LIMIT ?");

    let mut q = sqlx::query(&sql)
        .bind(fts_phrase(query))
        .bind(collection.to_string());
    if let Some(doc) = doc_filter {
        q = q.bind(doc.to_string());
    }
    let rows = q.bind(candidate_k).fetch_all(pool).await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            Candidate {
                id: row.get("id"),
                document_id: row.get("document_id"),
                raw_score: -rank,
                text: row.get("text"),
            }
        })
        .collect())
}

async fn fetch_chunk_vector(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    doc_filter: Option<&str>,
    candidate_k: i64,
) -> Result<Vec<Candidate>> {
    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), &config.embedding, query).await?;

    let mut sql = String::from(
        "SELECT cv.chunk_id AS id, cv.document_id AS document_id, cv.embedding AS embedding,
                COALESCE(substr(c.text, 1, 240), '') AS text
         FROM chunk_vectors cv
         JOIN chunks c ON c.id = cv.chunk_id",
    );
    if doc_filter.is_some() {
        sql.push_str(" WHERE cv.document_id = ?");
    }

    let mut q = sqlx::query(&sql);
    if let Some(doc) = doc_filter {
        q = q.bind(doc.to_string());
    }
    let rows = q.fetch_all(pool).await?;

    Ok(rank_by_cosine(rows, &query_vec, candidate_k))
}

async fn fetch_entity_vector(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    collection: &str,
    doc_filter: Option<&str>,
    candidate_k: i64,
) -> Result<Vec<Candidate>> {
    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), &config.embedding, query).await?;

    let mut sql = String::from(
        "SELECT v.entity_id AS id, v.document_id AS document_id, v.embedding AS embedding,
                e.text AS text
         FROM entity_vectors v
         JOIN entities e ON e.id = v.entity_id
         WHERE v.collection = ?",
    );
    if doc_filter.is_some() {
        sql.push_str(" AND v.document_id = ?");
    }

    let mut q = sqlx::query(&sql).bind(collection.to_string());
    if let Some(doc) = doc_filter {
        q = q.bind(doc.to_string());
    }
    let rows = q.fetch_all(pool).await?;

    Ok(rank_by_cosine(rows, &query_vec, candidate_k))
}

fn rank_by_cosine(
    rows: Vec<sqlx::sqlite::SqliteRow>,
    query_vec: &[f32],
    candidate_k: i64,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            Candidate {
                id: row.get("id"),
                document_id: row.get("document_id"),
                raw_score: embedding::cosine_similarity(query_vec, &vec) as f64,
                text: row.get("text"),
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(candidate_k as usize);
    candidates
}

/// Min-max normalize each channel to [0, 1], then merge unique candidates
/// with `hybrid = (1 - alpha) * keyword + alpha * vector`.
fn blend_scores(
    keyword: &[Candidate],
    vector: &[Candidate],
    alpha: f64,
) -> Vec<(Candidate, f64)> {
    let kw_map: HashMap<&str, f64> = normalize_scores(keyword)
        .into_iter()
        .map(|(c, s)| (c.id.as_str(), s))
        .collect();
    let vec_map: HashMap<&str, f64> = normalize_scores(vector)
        .into_iter()
        .map(|(c, s)| (c.id.as_str(), s))
        .collect();

    let mut merged: HashMap<&str, &Candidate> = HashMap::new();
    for c in keyword {
        merged.entry(c.id.as_str()).or_insert(c);
    }
    for c in vector {
        merged.entry(c.id.as_str()).or_insert(c);
    }

    merged
        .into_iter()
        .map(|(id, cand)| {
            let k = kw_map.get(id).copied().unwrap_or(0.0);
            let v = vec_map.get(id).copied().unwrap_or(0.0);
            ((*cand).clone(), (1.0 - alpha) * k + alpha * v)
        })
        .collect()
}

fn normalize_scores(candidates: &[Candidate]) -> Vec<(&Candidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

/// Group scored chunks per document (max aggregation), then print one block
/// per document with its best chunk as the excerpt.
async fn print_document_results(
    pool: &SqlitePool,
    blended: &[(Candidate, f64)],
    final_limit: usize,
) -> Result<()> {
    struct DocResult {
        score: f64,
        best_chunk_id: String,
        best_snippet: String,
    }

    let mut doc_map: HashMap<String, DocResult> = HashMap::new();
    for (cand, score) in blended {
        let entry = doc_map
            .entry(cand.document_id.clone())
            .or_insert_with(|| DocResult {
                score: *score,
                best_chunk_id: cand.id.clone(),
                best_snippet: cand.text.clone(),
            });
        if *score > entry.score {
            entry.score = *score;
            entry.best_chunk_id = cand.id.clone();
            entry.best_snippet = cand.text.clone();
        }
    }

    struct DisplayResult {
        id: String,
        title: Option<String>,
        source: String,
        updated_at: i64,
        chunk_index: i64,
        page: i64,
        score: f64,
        snippet: String,
    }

    let mut results: Vec<DisplayResult> = Vec::new();
    for (doc_id, doc_result) in &doc_map {
        let doc_row = sqlx::query("SELECT id, title, source, updated_at FROM documents WHERE id = ?")
            .bind(doc_id)
            .fetch_optional(pool)
            .await?;
        let Some(row) = doc_row else { continue };

        let (chunk_index, page): (i64, i64) =
            sqlx::query_as("SELECT chunk_index, page FROM chunks WHERE id = ?")
                .bind(&doc_result.best_chunk_id)
                .fetch_optional(pool)
                .await?
                .unwrap_or((0, -1));

        results.push(DisplayResult {
            id: row.get("id"),
            title: row.get("title"),
            source: row.get("source"),
            updated_at: row.get("updated_at"),
            chunk_index,
            page,
            score: doc_result.score,
            snippet: doc_result.best_snippet.clone(),
        });
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    // Deterministic: score desc, updated_at desc, id asc
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.updated_at.cmp(&a.updated_at))
            .then(a.id.cmp(&b.id))
    });
    results.truncate(final_limit);

    for (i, result) in results.iter().enumerate() {
        let title_display = result.title.as_deref().unwrap_or("(untitled)");
        let date = chrono::DateTime::from_timestamp(result.updated_at, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        println!("{}. [{:.2}] {} / {}", i + 1, result.score, result.source, title_display);
        println!("    updated: {}", date);
        if result.page >= 0 {
            println!("    chunk: {} (page {})", result.chunk_index, result.page);
        } else {
            println!("    chunk: {}", result.chunk_index);
        }
        println!("    excerpt: \"{}\"", result.snippet.replace('\n', " ").trim());
        println!("    id: {}", result.id);
        println!();
    }

    Ok(())
}

fn print_entity_results(blended: &[(Candidate, f64)], collection: &str, final_limit: usize) {
    if blended.is_empty() {
        println!("No results.");
        return;
    }
    for (i, (cand, score)) in blended.iter().take(final_limit).enumerate() {
        println!(
            "{}. [{:.2}] {} | {} | doc: {}",
            i + 1,
            score,
            collection,
            cand.text.replace('\n', " ").trim(),
            cand.document_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candidate(id: &str, doc_id: &str, score: f64) -> Candidate {
        Candidate {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            raw_score: score,
            text: String::new(),
        }
    }

    #[test]
    fn normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn normalize_single_candidate_scores_one() {
        let candidates = vec![make_candidate("c1", "d1", 5.0)];
        let result = normalize_scores(&candidates);
        assert_eq!(result.len(), 1);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_spreads_over_unit_range() {
        let candidates = vec![
            make_candidate("c1", "d1", 10.0),
            make_candidate("c2", "d2", 5.0),
            make_candidate("c3", "d3", 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_all_equal_scores_one() {
        let candidates = vec![
            make_candidate("c1", "d1", 3.0),
            make_candidate("c2", "d2", 3.0),
        ];
        for (_, score) in normalize_scores(&candidates) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn normalized_scores_stay_in_unit_interval() {
        let candidates = vec![
            make_candidate("c1", "d1", -5.0),
            make_candidate("c2", "d2", 100.0),
            make_candidate("c3", "d3", 42.0),
        ];
        for (_, score) in normalize_scores(&candidates) {
            assert!((0.0..=1.0).contains(&score), "score out of range: {}", score);
        }
    }

    #[test]
    fn alpha_zero_preserves_keyword_ordering() {
        let kw = vec![
            make_candidate("c1", "d1", 10.0),
            make_candidate("c2", "d2", 5.0),
            make_candidate("c3", "d3", 1.0),
        ];
        let vectors = vec![
            make_candidate("c1", "d1", 0.1),
            make_candidate("c2", "d2", 0.9),
        ];

        let mut blended = blend_scores(&kw, &vectors, 0.0);
        blended.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        let order: Vec<&str> = blended.iter().map(|(c, _)| c.id.as_str()).collect();
        assert_eq!(order, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn alpha_one_preserves_vector_ordering() {
        let kw = vec![
            make_candidate("c1", "d1", 10.0),
            make_candidate("c2", "d2", 5.0),
        ];
        let vectors = vec![
            make_candidate("c1", "d1", 0.1),
            make_candidate("c2", "d2", 0.9),
            make_candidate("c3", "d3", 0.5),
        ];

        let mut blended = blend_scores(&kw, &vectors, 1.0);
        blended.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        let order: Vec<&str> = blended.iter().map(|(c, _)| c.id.as_str()).collect();
        assert_eq!(order, vec!["c2", "c3", "c1"]);
    }

    #[test]
    fn blend_keeps_channel_exclusive_candidates() {
        let kw = vec![make_candidate("only-kw", "d1", 2.0)];
        let vectors = vec![make_candidate("only-vec", "d2", 0.7)];
        let blended = blend_scores(&kw, &vectors, 0.6);
        assert_eq!(blended.len(), 2);
    }

    #[test]
    fn fts_phrase_quotes_and_escapes() {
        assert_eq!(fts_phrase("snow removal"), "\"snow removal\"");
        assert_eq!(fts_phrase("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
