//! Word-window chunking for ingested documents.
//!
//! Long texts are split into overlapping windows so retrieval can match a
//! passage without dragging the whole document into the prompt.

/// Split `text` into chunks of at most `max_words` words, with consecutive
/// chunks sharing `overlap` words at the boundary.
///
/// Texts of `max_words` words or fewer come back as a single chunk. For
/// longer texts the window advances by `max_words - overlap`, producing
/// `ceil((n - overlap) / (max_words - overlap))` chunks.
pub fn chunk_text(text: &str, max_words: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() || max_words == 0 {
        return Vec::new();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return vec![words.join(" ")];
    }

    let step = max_words.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + max_words).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }

    tracing::debug!("chunked {} words into {} chunks", words.len(), chunks.len());
    chunks
}

/// Rough token estimate (~0.75 tokens per word).
pub fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() as f64 * 0.75) as usize
}
