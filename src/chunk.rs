//! Record chunker.
//!
//! Packs adjacent row [`Record`]s into [`Chunk`]s bounded by a maximum
//! character length. A record longer than the limit is split with a sliding
//! window; the configured overlap is carried only between pieces of that one
//! record, never across unrelated rows, so a chunk boundary between rows
//! stays clean.
//!
//! Chunking is deterministic and pure: identical records and parameters
//! always yield an identical chunk sequence. Each chunk carries a SHA-256
//! hash of its text.

use sha2::{Digest, Sha256};

use crate::models::{Chunk, Record};

/// Split records into chunks of at most `max_chars` bytes of UTF-8,
/// snapped to character boundaries. Returns chunks with contiguous
/// indices starting at 0.
///
/// `overlap_chars` must be smaller than `max_chars`; config validation
/// enforces this before the pipeline runs.
pub fn chunk_records(records: &[Record], max_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut chunk_index: i64 = 0;

    for record in records {
        let text = record.text.trim();
        if text.is_empty() {
            continue;
        }

        // Oversized record: flush the buffer, then window over the record.
        if text.len() > max_chars {
            if !buf.is_empty() {
                chunks.push(make_chunk(chunk_index, &buf));
                chunk_index += 1;
                buf.clear();
            }
            for piece in split_with_overlap(text, max_chars, overlap_chars) {
                chunks.push(make_chunk(chunk_index, piece.trim()));
                chunk_index += 1;
            }
            continue;
        }

        // Would this record push the buffer past the limit? Flush first.
        // +1 for the newline separator.
        let would_be = if buf.is_empty() {
            text.len()
        } else {
            buf.len() + 1 + text.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            chunks.push(make_chunk(chunk_index, &buf));
            chunk_index += 1;
            buf.clear();
        }

        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(text);
    }

    if !buf.is_empty() {
        chunks.push(make_chunk(chunk_index, &buf));
    }

    chunks
}

/// Sliding-window split of a single record's text. Each window is at most
/// `max_chars` long and starts `max_chars - overlap_chars` after the
/// previous one, snapped back to a char boundary.
fn split_with_overlap(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<&str> {
    let step = max_chars - overlap_chars;
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = prev_boundary(text, (start + max_chars).min(text.len()));
        if end <= start {
            // A single code point wider than the window; take it whole.
            end = next_boundary(text, start + 1);
        }
        pieces.push(&text[start..end]);
        if end >= text.len() {
            break;
        }

        let mut next = prev_boundary(text, start + step);
        if next <= start {
            next = end;
        }
        start = next;
    }

    pieces
}

fn prev_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i.min(s.len())
}

fn make_chunk(index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
