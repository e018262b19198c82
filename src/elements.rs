//! Extraction-service result elements.
//!
//! `rfx import` accepts the JSON the upstream ingestion service emits: arrays
//! of element objects (text blocks, tables, image captions, audio
//! transcripts), each tagged with page and layout metadata. Elements are
//! sorted into reading order, assembled into a document body, and mapped one
//! text-bearing element to one chunk so page numbers survive.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::chunk::make_chunk;
use crate::models::Chunk;

#[derive(Debug, Clone, Deserialize)]
pub struct Element {
    #[serde(default)]
    pub document_type: String,
    #[serde(default)]
    pub metadata: ElementMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ElementMetadata {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_metadata: Option<ContentMetadata>,
    #[serde(default)]
    pub source_metadata: Option<SourceMetadata>,
    #[serde(default)]
    pub table_metadata: Option<TableMetadata>,
    #[serde(default)]
    pub image_metadata: Option<ImageMetadata>,
    #[serde(default)]
    pub audio_metadata: Option<AudioMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentMetadata {
    #[serde(default)]
    pub page_number: Option<i64>,
    #[serde(default)]
    pub hierarchy: Option<Hierarchy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hierarchy {
    #[serde(default)]
    pub page: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceMetadata {
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableMetadata {
    #[serde(default)]
    pub table_content: Option<String>,
    #[serde(default)]
    pub table_location: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageMetadata {
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioMetadata {
    #[serde(default)]
    pub audio_transcript: Option<String>,
}

impl Element {
    pub fn page(&self) -> i64 {
        self.metadata
            .content_metadata
            .as_ref()
            .and_then(|cm| cm.page_number)
            .unwrap_or(-1)
    }

    /// Layout position for ordering; non-structured elements sort after
    /// structured ones on the same page.
    fn position(&self) -> (f64, f64) {
        if self.document_type == "structured" {
            if let Some(tm) = &self.metadata.table_metadata {
                let x0 = tm.table_location.first().copied().unwrap_or(f64::INFINITY);
                let y0 = tm.table_location.get(1).copied().unwrap_or(f64::INFINITY);
                return (x0, y0);
            }
        }
        (f64::INFINITY, f64::INFINITY)
    }

    /// The text this element contributes, if any.
    pub fn text(&self) -> Option<String> {
        match self.document_type.as_str() {
            "structured" => self
                .metadata
                .table_metadata
                .as_ref()
                .and_then(|tm| tm.table_content.clone())
                .filter(|t| !t.trim().is_empty()),
            "text" => self
                .metadata
                .content
                .clone()
                .filter(|t| !t.trim().is_empty()),
            "image" => self
                .metadata
                .image_metadata
                .as_ref()
                .and_then(|im| im.caption.as_deref())
                .filter(|c| !c.trim().is_empty())
                .map(|c| format!("image_caption:[{}]", c)),
            "audio" => self
                .metadata
                .audio_metadata
                .as_ref()
                .and_then(|am| am.audio_transcript.clone())
                .filter(|t| !t.trim().is_empty()),
            _ => None,
        }
    }
}

/// Parse a results file: either `[element, …]` (one document) or
/// `[[element, …], …]` (several documents).
pub fn parse_results(raw: &str) -> Result<Vec<Vec<Element>>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("results file is not valid JSON")?;

    let outer = value
        .as_array()
        .context("results file must contain a JSON array")?;

    if outer.is_empty() {
        return Ok(Vec::new());
    }

    if outer[0].is_array() {
        serde_json::from_value(value).context("malformed nested element arrays")
    } else {
        let single: Vec<Element> =
            serde_json::from_value(value).context("malformed element array")?;
        Ok(vec![single])
    }
}

/// Elements in reading order: by page, then table layout position.
pub fn sorted_refs(elements: &[Element]) -> Vec<&Element> {
    let mut refs: Vec<&Element> = elements.iter().collect();
    refs.sort_by(|a, b| {
        a.page().cmp(&b.page()).then_with(|| {
            let (ax, ay) = a.position();
            let (bx, by) = b.position();
            ax.partial_cmp(&bx)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ay.partial_cmp(&by).unwrap_or(std::cmp::Ordering::Equal))
        })
    });
    refs
}

/// Concatenate the sorted elements' texts, one newline after each entry.
pub fn assemble_blob(elements: &[Element]) -> String {
    let mut blob = String::new();
    for element in sorted_refs(elements) {
        if let Some(text) = element.text() {
            blob.push_str(&text);
            blob.push('\n');
        }
    }
    blob
}

/// One chunk per text-bearing element, in reading order, keeping pages.
pub fn element_chunks(document_id: &str, elements: &[Element]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for element in sorted_refs(elements) {
        if let Some(text) = element.text() {
            let index = chunks.len() as i64;
            chunks.push(make_chunk(document_id, index, element.page(), &text));
        }
    }
    chunks
}

/// Source id recorded by the service on the first text element, if any.
pub fn primary_source_id(elements: &[Element]) -> Option<String> {
    elements.iter().find_map(|e| {
        e.metadata
            .source_metadata
            .as_ref()
            .and_then(|sm| sm.source_id.clone())
            .filter(|s| !s.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_element(content: &str, page: i64) -> serde_json::Value {
        json!({
            "document_type": "text",
            "metadata": {
                "content": content,
                "content_metadata": {"page_number": page, "hierarchy": {"page": page}},
                "source_metadata": {"source_id": "rfp-001.pdf", "source_type": "pdf"}
            }
        })
    }

    fn table_element(content: &str, page: i64, x0: f64, y0: f64) -> serde_json::Value {
        json!({
            "document_type": "structured",
            "metadata": {
                "content_metadata": {"page_number": page},
                "table_metadata": {"table_content": content, "table_location": [x0, y0, x0 + 10.0, y0 + 10.0]}
            }
        })
    }

    #[test]
    fn parses_flat_and_nested_results() {
        let flat = json!([text_element("a", 0)]).to_string();
        let nested = json!([[text_element("a", 0)], [text_element("b", 1)]]).to_string();
        assert_eq!(parse_results(&flat).unwrap().len(), 1);
        assert_eq!(parse_results(&nested).unwrap().len(), 2);
        assert!(parse_results("{\"not\": \"an array\"}").is_err());
    }

    #[test]
    fn tables_sort_before_text_on_the_same_page() {
        let raw = json!([
            text_element("after the table", 1),
            table_element("| fee | due |", 1, 10.0, 20.0),
            text_element("page zero text", 0),
        ])
        .to_string();
        let docs = parse_results(&raw).unwrap();
        let blob = assemble_blob(&docs[0]);
        assert_eq!(blob, "page zero text\n| fee | due |\nafter the table\n");
    }

    #[test]
    fn image_captions_and_transcripts_are_rendered() {
        let raw = json!([
            {
                "document_type": "image",
                "metadata": {
                    "content_metadata": {"page_number": 0},
                    "image_metadata": {"caption": "site plan"}
                }
            },
            {
                "document_type": "audio",
                "metadata": {
                    "content_metadata": {"page_number": 0},
                    "audio_metadata": {"audio_transcript": "pre-bid call recording"}
                }
            },
            {
                "document_type": "image",
                "metadata": {
                    "content_metadata": {"page_number": 1},
                    "image_metadata": {"caption": ""}
                }
            }
        ])
        .to_string();
        let docs = parse_results(&raw).unwrap();
        let blob = assemble_blob(&docs[0]);
        assert!(blob.contains("image_caption:[site plan]"));
        assert!(blob.contains("pre-bid call recording"));
        // Empty caption contributes nothing
        assert_eq!(blob.matches("image_caption").count(), 1);
    }

    #[test]
    fn element_chunks_keep_pages_and_order() {
        let raw = json!([
            text_element("second", 2),
            text_element("first", 1),
        ])
        .to_string();
        let docs = parse_results(&raw).unwrap();
        let chunks = element_chunks("doc1", &docs[0]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "first");
        assert_eq!(chunks[0].page, 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].text, "second");
        assert_eq!(chunks[1].page, 2);
    }

    #[test]
    fn primary_source_id_comes_from_text_metadata() {
        let raw = json!([text_element("body", 0)]).to_string();
        let docs = parse_results(&raw).unwrap();
        assert_eq!(
            primary_source_id(&docs[0]).as_deref(),
            Some("rfp-001.pdf")
        );
    }
}
