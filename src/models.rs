//! Core data models used throughout rfx-harvest.
//!
//! These types represent the documents, chunks, and extracted entities that
//! flow through the ingestion, harvest, and retrieval pipeline.

use std::path::PathBuf;

/// A document prepared for storage, before it gets an id.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub source: String,
    pub source_id: String,
    pub content_type: String,
    pub title: Option<String>,
    pub body: String,
    pub metadata_json: String,
}

/// Normalized solicitation document stored in SQLite.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    /// Where the document came from: a file path or a results JSON path.
    pub source: String,
    /// Position within the source: relative path for files, index for
    /// multi-document imports.
    pub source_id: String,
    pub content_type: String,
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub body: String,
    pub metadata_json: String,
    /// SHA-256 of the body; unchanged sources are skipped on re-ingest.
    pub dedup_hash: String,
}

/// A chunk of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    /// Page the chunk came from; -1 when the source has no page model.
    pub page: i64,
    pub text: String,
    pub hash: String,
}

/// A file discovered by the scanner.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the scanned root, or the file name for explicit files.
    pub relative: String,
    pub size: u64,
}

/// One searchable row materialized from a document's extraction state.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub id: String,
    pub document_id: String,
    pub collection: String,
    pub text: String,
    pub payload_json: String,
}
