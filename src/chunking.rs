//! Character-window chunking for document text.
//!
//! Text is normalized (all whitespace runs collapsed to single spaces, ends trimmed)
//! and then split into fixed-width windows of Unicode scalar values. Consecutive
//! windows share a configurable overlap so that sentences straddling a boundary
//! stay retrievable from at least one chunk.

/// A bounded window of a document's normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The window's text with any leading or trailing whitespace trimmed.
    pub text: String,
    /// Zero-based position of this chunk within the document.
    pub index: usize,
}

/// Window width used when no size is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// Overlap used when no overlap is configured.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Split `text` into overlapping windows of at most `size` characters.
///
/// Whitespace is collapsed before windowing, so chunk offsets are measured in
/// characters of the normalized text. Each window after the first starts
/// `size - overlap` characters after its predecessor; an overlap of `size` or
/// more is clamped to `size - 1` so the cursor always advances. Blank input
/// (or a zero `size`) produces no chunks. Chunk indices are contiguous from 0.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<Chunk> {
    let cleaned = normalize_whitespace(text);
    if cleaned.is_empty() || size == 0 {
        return Vec::new();
    }
    let overlap = overlap.min(size.saturating_sub(1));

    let chars: Vec<char> = cleaned.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut index = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        let trimmed = window.trim();
        if !trimmed.is_empty() {
            chunks.push(Chunk {
                text: trimmed.to_string(),
                index,
            });
            index += 1;
        }
        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap);
    }
    chunks
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
