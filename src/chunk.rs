//! Overlapping window chunker.
//!
//! Splits each source section into [`DocumentChunk`]s of at most
//! `chunk_size` characters. Consecutive chunks of a section share exactly
//! `overlap` characters: every chunk after the first starts `overlap`
//! characters before the end of its predecessor.
//!
//! Window ends prefer natural boundaries. Within the part of the window that
//! still guarantees forward progress, the splitter looks for the last blank
//! line, then the last newline, then the last space, and cuts just after it.
//! Only when none exists is the window cut at `chunk_size` exactly.
//!
//! Text is never trimmed or rewritten, so dropping each chunk's leading
//! overlap and concatenating the rest reproduces the section verbatim.

use crate::models::{DocumentChunk, SourceSection};

/// Boundaries tried in order of preference.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Chunk every section, numbering chunks across the whole corpus.
pub fn chunk_sections(
    sections: &[SourceSection],
    chunk_size: usize,
    overlap: usize,
) -> Vec<DocumentChunk> {
    let mut chunks = Vec::new();
    for section in sections {
        let first_order = chunks.len() as i64;
        chunks.extend(chunk_text(
            &section.source_id,
            &section.text,
            chunk_size,
            overlap,
            first_order,
        ));
    }
    chunks
}

/// Split one section. Empty text yields no chunks; orders start at
/// `first_order` and are contiguous.
pub fn chunk_text(
    source_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
    first_order: i64,
) -> Vec<DocumentChunk> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    // bounds[i] is the byte offset of character i; the last entry is text.len().
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < total_chars {
        let hard_end = (start + chunk_size).min(total_chars);
        let end = if hard_end == total_chars {
            hard_end
        } else {
            // Cutting at or before start + overlap would stall the next window.
            find_break(text, &bounds, start + overlap + 1, hard_end).unwrap_or(hard_end)
        };

        chunks.push(DocumentChunk {
            source_id: source_id.to_string(),
            text: text[bounds[start]..bounds[end]].to_string(),
            order: first_order + chunks.len() as i64,
            start: start as i64,
        });

        if end == total_chars {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Last separator-aligned cut in `(lo, hi]`, as a character index.
fn find_break(text: &str, bounds: &[usize], lo: usize, hi: usize) -> Option<usize> {
    if lo > hi {
        return None;
    }
    let window_start = bounds[lo - 1];
    let window = &text[window_start..bounds[hi]];
    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let cut = window_start + pos + sep.len();
            // Separators are ASCII, so the cut is always a character boundary.
            if let Ok(idx) = bounds.binary_search(&cut) {
                if idx >= lo {
                    return Some(idx);
                }
            }
        }
    }
    None
}
