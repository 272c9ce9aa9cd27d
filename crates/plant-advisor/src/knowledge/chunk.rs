//! Paragraph-boundary text chunker.
//!
//! Paragraphs (`\n\n`) are packed into chunks of at most `chunk_size`
//! characters. Each chunk after the first starts with up to `overlap`
//! characters from the end of the previous one, cut at a word boundary.
//! Paragraphs longer than a chunk are hard-split at whitespace.

/// Split `text` into overlapping chunks; blank text yields no chunks
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size / 2);
    let piece_limit = if overlap == 0 {
        chunk_size
    } else {
        chunk_size.saturating_sub(overlap + 2).max(1)
    };

    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0;

    let paragraphs = text.split("\n\n").map(str::trim).filter(|p| !p.is_empty());
    for piece in paragraphs.flat_map(|p| split_long(p, piece_limit)) {
        let piece_chars = char_len(piece);
        let needed = if buf.is_empty() { piece_chars } else { buf_chars + 2 + piece_chars };
        if needed > chunk_size && !buf.is_empty() {
            let room = chunk_size.saturating_sub(piece_chars + 2);
            let carry = tail(&buf, overlap.min(room)).to_string();
            buf_chars = char_len(&carry);
            chunks.push(std::mem::replace(&mut buf, carry));
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
            buf_chars += 2;
        }
        buf.push_str(piece);
        buf_chars += piece_chars;
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`th character, or the end of `s`
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

/// Hard-split an oversized paragraph, preferring whitespace boundaries
fn split_long(paragraph: &str, limit: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = paragraph;

    while char_len(remaining) > limit {
        let boundary = byte_offset(remaining, limit);
        let cut = remaining[..boundary]
            .rfind(char::is_whitespace)
            .filter(|&i| i > 0)
            .unwrap_or(boundary);
        let cut = if cut == 0 {
            remaining.chars().next().map_or(remaining.len(), char::len_utf8)
        } else {
            cut
        };

        let piece = remaining[..cut].trim_end();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        remaining = remaining[cut..].trim_start();
    }

    if !remaining.is_empty() {
        pieces.push(remaining);
    }
    pieces
}

/// Last `max_chars` characters of `s`, starting at a word boundary when possible
fn tail(s: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    let total = char_len(s);
    if total <= max_chars {
        return s;
    }

    let window = &s[byte_offset(s, total - max_chars)..];
    match window.find(char::is_whitespace) {
        Some(i) if i + 1 < window.len() => window[i..].trim_start(),
        _ => window,
    }
}
