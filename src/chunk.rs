//! Paragraph-boundary text chunker with overlap.
//!
//! Splits document body text into [`Chunk`]s that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`)
//! where possible; consecutive chunks share an `overlap_tokens` tail so
//! facts straddling a boundary stay visible to the extraction loop.
//!
//! Each chunk carries a SHA-256 hash of its text for staleness detection.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate bytes-per-token ratio used for sizing.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks, respecting max_tokens and overlapping by
/// overlap_tokens. Returns chunks with contiguous indices starting at 0;
/// whitespace-only input yields none.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    if text.trim().is_empty() {
        return Vec::new();
    }

    let pieces = split_pieces(text, max_chars);

    let mut chunks = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        let chunk_body = if i > 0 && overlap_chars > 0 {
            let tail = char_tail(&pieces[i - 1], overlap_chars);
            if tail.is_empty() {
                piece.clone()
            } else {
                format!("{}\n{}", tail, piece)
            }
        } else {
            piece.clone()
        };
        chunks.push(make_chunk(document_id, i as i64, -1, &chunk_body));
    }

    chunks
}

/// Paragraph-accumulating split; oversized paragraphs fall back to
/// newline/space boundaries, then a hard cut on a char boundary.
fn split_pieces(text: &str, max_chars: usize) -> Vec<String> {
    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in paragraphs {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len() // +2 for \n\n separator
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            if !current_buf.is_empty() {
                pieces.push(std::mem::take(&mut current_buf));
            }
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let mut split_at = remaining.len().min(max_chars);
                while !remaining.is_char_boundary(split_at) {
                    split_at -= 1;
                }
                // Prefer a newline or space boundary over a hard cut
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let piece = remaining[..actual_split].trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
}

/// Last `max_bytes` of `s`, trimmed to char and word boundaries.
fn char_tail(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    match s[start..].find(char::is_whitespace) {
        Some(pos) => s[start + pos..].trim_start(),
        None => &s[start..],
    }
}

pub(crate) fn make_chunk(document_id: &str, index: i64, page: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        page,
        text: text.to_string(),
        hash,
    }
}
