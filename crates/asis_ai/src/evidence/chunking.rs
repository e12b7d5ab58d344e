use asis_core::config::validate_chunking;
use asis_core::error::AppError;
use sha2::{Digest, Sha256};

use super::model::{Chunk, Document, PagePosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Boundary {
    Whitespace,
    Sentence,
    Paragraph,
}

/// Char spans covering `chars` with `overlap` shared chars between neighbours.
///
/// Each cut prefers the latest paragraph break inside the tolerance window
/// (the last fifth of the chunk), then a sentence end, then whitespace, and
/// falls back to a hard cut at `chunk_size`.
pub fn split_spans(
    chars: &[char],
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<ChunkSpan>, AppError> {
    validate_chunking(chunk_size, overlap)?;

    let n = chars.len();
    let mut spans = Vec::new();
    if n == 0 {
        return Ok(spans);
    }

    let tolerance = (chunk_size / 5).max(1);
    let mut start = 0usize;
    loop {
        if n - start <= chunk_size {
            spans.push(ChunkSpan { start, end: n });
            break;
        }
        let hard_end = start + chunk_size;
        // Any cut must leave the next start strictly ahead of this one.
        let floor = hard_end.saturating_sub(tolerance).max(start + overlap + 1);
        let end = find_break(chars, floor, hard_end).unwrap_or(hard_end);
        spans.push(ChunkSpan { start, end });
        start = end - overlap;
    }
    Ok(spans)
}

fn boundary_before(chars: &[char], end: usize) -> Option<Boundary> {
    let last = *chars.get(end.checked_sub(1)?)?;
    let prev = end.checked_sub(2).and_then(|i| chars.get(i)).copied();
    if last == '\n' && prev == Some('\n') {
        return Some(Boundary::Paragraph);
    }
    if last == '\n' || (last.is_whitespace() && matches!(prev, Some('.' | '!' | '?'))) {
        return Some(Boundary::Sentence);
    }
    if last.is_whitespace() {
        return Some(Boundary::Whitespace);
    }
    None
}

fn find_break(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    if lo > hi {
        return None;
    }
    let mut best: Option<(Boundary, usize)> = None;
    for end in (lo..=hi).rev() {
        if let Some(kind) = boundary_before(chars, end) {
            if best.map_or(true, |(b, _)| kind > b) {
                best = Some((kind, end));
                if kind == Boundary::Paragraph {
                    break;
                }
            }
        }
    }
    best.map(|(_, end)| end)
}

/// Splits one text into chunks numbered from `first_sequence`.
pub fn split(
    text: &str,
    source_id: &str,
    page: PagePosition,
    chunk_size: usize,
    overlap: usize,
    first_sequence: u32,
) -> Result<Vec<Chunk>, AppError> {
    let chars: Vec<char> = text.chars().collect();
    let spans = split_spans(&chars, chunk_size, overlap)?;
    Ok(spans
        .into_iter()
        .enumerate()
        .map(|(i, span)| {
            let sequence_index = first_sequence + i as u32;
            let text: String = chars[span.start..span.end].iter().collect();
            Chunk {
                chunk_id: chunk_id_for(source_id, sequence_index, &text),
                source_id: source_id.to_string(),
                sequence_index,
                page,
                char_range: [span.start as u32, span.end as u32],
                text,
            }
        })
        .collect())
}

/// Chunks every page separately; sequence indices continue across pages.
pub fn chunk_document(
    doc: &Document,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, AppError> {
    validate_chunking(chunk_size, overlap)?;
    let mut out: Vec<Chunk> = Vec::new();
    for page in doc.pages.iter() {
        if page.text.trim().is_empty() {
            continue;
        }
        let next = out.len() as u32;
        out.extend(split(&page.text, &doc.source_id, page.position, chunk_size, overlap, next)?);
    }
    Ok(out)
}

pub fn chunk_id_for(source_id: &str, sequence_index: u32, text: &str) -> String {
    let payload = format!("source={source_id}\nseq={sequence_index}\ntext={text}");
    hex::encode(Sha256::digest(payload.as_bytes()))
}
