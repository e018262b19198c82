//! Entity collections: searchable rows materialized from extraction state.
//!
//! Each harvested field family lands in its own named collection so search
//! can target "who do I contact" separately from "what are the deadlines".
//! A row is a short text (what FTS and the embedder see) plus a JSON payload
//! carrying the structured parts.

use crate::embedding::{self, EmbeddingProvider};
use crate::models::EntityRecord;
use crate::schema::ExtractionState;
use anyhow::Result;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

pub const ENTITY_COLLECTIONS: [&str; 7] = [
    "requirements",
    "criteria",
    "contacts",
    "deadlines",
    "keywords",
    "standards",
    "organizations",
];

pub fn is_entity_collection(name: &str) -> bool {
    ENTITY_COLLECTIONS.contains(&name)
}

/// Flattens the state into entity rows. Keyword tokens store lowercased,
/// standards uppercased; contacts and organizations join their non-empty
/// parts into one line of text.
pub fn entity_rows(document_id: &str, state: &ExtractionState) -> Vec<EntityRecord> {
    let mut rows = Vec::new();
    let mut push = |collection: &str, text: String, payload: serde_json::Value| {
        if text.is_empty() {
            return;
        }
        rows.push(EntityRecord {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            collection: collection.to_string(),
            text,
            payload_json: payload.to_string(),
        });
    };

    for r in &state.requirements {
        push("requirements", r.trim().to_string(), json!({}));
    }
    for c in &state.evaluation_criteria {
        push("criteria", c.criterion.trim().to_string(), json!({}));
    }
    for c in &state.contacts {
        let parts: Vec<&str> = [&c.name, &c.title, &c.email, &c.phone]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.is_empty())
            .collect();
        push(
            "contacts",
            parts.join(" "),
            json!({
                "name": c.name,
                "title": c.title,
                "email": c.email,
                "phone": c.phone,
            }),
        );
    }
    for d in &state.deadlines {
        let text = match &d.kind {
            Some(kind) => format!("{} {}", d.date, kind),
            None => d.date.clone(),
        };
        push("deadlines", text, json!({ "date": d.date, "kind": d.kind }));
    }
    for k in &state.keywords {
        let token = k.trim().to_lowercase();
        push("keywords", token.clone(), json!({ "token": token }));
    }
    for s in &state.compliance_standards {
        let token = s.trim().to_uppercase();
        push("standards", token.clone(), json!({ "token": token }));
    }
    if let Some(org) = state.client_organization.as_deref().filter(|o| !o.is_empty()) {
        let industry = state.client_industry.as_deref().unwrap_or("");
        let text = format!("{} {}", org, industry).trim().to_string();
        push(
            "organizations",
            text,
            json!({ "organization": org, "industry": industry }),
        );
    }
    rows
}

/// Replaces all entity rows for a document with ones derived from `state`.
/// Vectors are dropped too; the embed command (or inline embedding after a
/// harvest) repopulates them.
pub async fn store_entities(
    pool: &SqlitePool,
    document_id: &str,
    state: &ExtractionState,
) -> Result<usize> {
    let rows = entity_rows(document_id, state);

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM entities WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM entities_fts WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM entity_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    let now = chrono::Utc::now().timestamp();
    for row in &rows {
        sqlx::query(
            "INSERT INTO entities (id, document_id, collection, text, payload_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.document_id)
        .bind(&row.collection)
        .bind(&row.text)
        .bind(&row.payload_json)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO entities_fts (entity_id, document_id, collection, text)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.document_id)
        .bind(&row.collection)
        .bind(&row.text)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(rows.len())
}

/// Embeds every entity row of a document that has no vector yet. Returns the
/// number embedded.
pub async fn embed_document_entities(
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
    config: &crate::config::EmbeddingConfig,
    document_id: &str,
) -> Result<usize> {
    let pending: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT e.id, e.collection, e.text FROM entities e
         LEFT JOIN entity_vectors v ON v.entity_id = e.id
         WHERE e.document_id = ? AND v.entity_id IS NULL
         ORDER BY e.collection, e.id",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    if pending.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = pending.iter().map(|(_, _, text)| text.clone()).collect();
    let vectors = embedding::embed_texts(provider, config, &texts).await?;

    let now = chrono::Utc::now().timestamp();
    for ((entity_id, collection, _), vector) in pending.iter().zip(vectors.iter()) {
        sqlx::query(
            "INSERT OR REPLACE INTO entity_vectors
             (entity_id, document_id, collection, model, dims, embedding, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entity_id)
        .bind(document_id)
        .bind(collection)
        .bind(provider.model_name())
        .bind(vector.len() as i64)
        .bind(embedding::vec_to_blob(vector))
        .bind(now)
        .execute(pool)
        .await?;
    }

    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Contact, Criterion, Deadline};

    fn sample_state() -> ExtractionState {
        let mut state = ExtractionState::default();
        state.client_organization = Some("City of Lakewood".into());
        state.client_industry = Some("municipal government".into());
        state.requirements = vec!["Plow arterial routes within 4 hours".into()];
        state.evaluation_criteria = vec![Criterion { criterion: "Past performance".into() }];
        state.contacts = vec![Contact {
            name: Some("Jane Doe".into()),
            title: None,
            email: Some("jane@city.gov".into()),
            phone: None,
        }];
        state.deadlines = vec![
            Deadline { date: "2025-09-29".into(), kind: Some("proposals due".into()) },
            Deadline { date: "2025-10-15".into(), kind: None },
        ];
        state.keywords = vec!["Snowplows".into()];
        state.compliance_standards = vec!["iso 9001".into()];
        state
    }

    #[test]
    fn rows_cover_every_collection() {
        let rows = entity_rows("doc-1", &sample_state());
        for collection in ENTITY_COLLECTIONS {
            assert!(
                rows.iter().any(|r| r.collection == collection),
                "no rows for {collection}"
            );
        }
    }

    #[test]
    fn contact_text_joins_present_parts() {
        let rows = entity_rows("doc-1", &sample_state());
        let contact = rows.iter().find(|r| r.collection == "contacts").unwrap();
        assert_eq!(contact.text, "Jane Doe jane@city.gov");
        let payload: serde_json::Value = serde_json::from_str(&contact.payload_json).unwrap();
        assert_eq!(payload["email"], "jane@city.gov");
        assert_eq!(payload["title"], serde_json::Value::Null);
    }

    #[test]
    fn deadline_text_is_date_then_kind() {
        let rows = entity_rows("doc-1", &sample_state());
        let texts: Vec<&str> = rows
            .iter()
            .filter(|r| r.collection == "deadlines")
            .map(|r| r.text.as_str())
            .collect();
        assert_eq!(texts, vec!["2025-09-29 proposals due", "2025-10-15"]);
    }

    #[test]
    fn tokens_store_normalized() {
        let rows = entity_rows("doc-1", &sample_state());
        let keyword = rows.iter().find(|r| r.collection == "keywords").unwrap();
        assert_eq!(keyword.text, "snowplows");
        let standard = rows.iter().find(|r| r.collection == "standards").unwrap();
        assert_eq!(standard.text, "ISO 9001");
    }

    #[test]
    fn organization_row_requires_a_name() {
        let mut state = ExtractionState::default();
        state.client_industry = Some("aerospace".into());
        assert!(entity_rows("doc-1", &state).is_empty());

        state.client_organization = Some("Orbital Freight".into());
        let rows = entity_rows("doc-1", &state);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "Orbital Freight aerospace");
    }
}
