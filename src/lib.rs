//! # RFX Harvest
//!
//! A local-first pipeline that turns RFP/RFI/RFQ solicitation documents into
//! a structured, searchable knowledge base.
//!
//! RFX Harvest ingests solicitation files (PDF, DOCX, HTML, Markdown, plain
//! text) or pre-parsed element JSON, chunks and embeds them, runs an
//! LLM-driven merge-extraction loop that accumulates one evidence-checked
//! profile per document, and exposes keyword / semantic / hybrid retrieval
//! over both raw chunks and the extracted entity collections.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Files /       │──▶│ Extract +    │──▶│ SQLite        │
//! │ element JSON  │   │ Chunk + Embed│   │ FTS5 + BLOBs  │
//! └──────────────┘   └──────────────┘   └──────┬────────┘
//!                                              │
//!                    ┌──────────────┐          │
//!                    │ LLM harvest  │◀─────────┤
//!                    │ merge loop   │──────────┤
//!                    └──────────────┘          ▼
//!                                       ┌──────────────┐
//!                                       │  CLI (rfx)   │
//!                                       └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rfx init                              # create database
//! rfx ingest ./solicitations           # extract, chunk, embed, harvest
//! rfx harvest --all                    # retry incomplete extractions
//! rfx search "snow removal" --mode hybrid
//! rfx search "insurance" --collection requirements
//! rfx get <doc-id>                     # extracted profile + entities
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`scan`] | File discovery with include/exclude globs |
//! | [`extract`] | Text extraction per content type |
//! | [`elements`] | Pre-parsed element JSON import format |
//! | [`chunk`] | Text chunking |
//! | [`schema`] | Extraction state: the per-document profile |
//! | [`prompt`] | Merge-extraction prompt assembly |
//! | [`sanitize`] | Model-output normalization |
//! | [`evidence`] | Evidence-checked state merging |
//! | [`harvest`] | Per-document extraction loop |
//! | [`collections`] | Entity rows derived from extraction state |
//! | [`llm`] | Chat-completions client |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`search`] | Keyword, semantic, and hybrid search |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod collections;
pub mod config;
pub mod dates;
pub mod db;
pub mod docs;
pub mod elements;
pub mod embed_cmd;
pub mod embedding;
pub mod evidence;
pub mod extract;
pub mod get;
pub mod harvest;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod prompt;
pub mod sanitize;
pub mod scan;
pub mod schema;
pub mod search;
pub mod stats;
