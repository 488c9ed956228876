//! Splits an outbound message body into parts no longer than a channel's
//! `max_msg_length`, preserving UTF-8 boundaries and never breaking a URL
//! across two parts (spec §4.5).

/// Build the full text for a send — the message body with each attachment
/// URL appended as its own line — then split it into parts.
pub fn build_parts(text: &str, attachment_urls: &[String], max_len: usize) -> Vec<String> {
    let mut full = text.to_string();
    for url in attachment_urls {
        if !full.is_empty() {
            full.push('\n');
        }
        full.push_str(url);
    }
    split_text(&full, max_len)
}

/// Greedy word-wrap split on whitespace, so a unit (including a URL) is only
/// ever broken across parts if it alone exceeds `max_len`.
pub fn split_text(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 || text.chars().count() <= max_len {
        return if text.is_empty() {
            vec![]
        } else {
            vec![text.to_string()]
        };
    }

    let mut parts = Vec::new();
    let mut current = String::new();

    for word in text.split_inclusive(char::is_whitespace) {
        if current.chars().count() + word.chars().count() > max_len && !current.is_empty() {
            parts.push(std::mem::take(&mut current).trim_end().to_string());
        }

        if word.chars().count() > max_len {
            // A single unit too long to fit any part on its own (e.g. a URL
            // longer than max_len): force a char-boundary-safe split.
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current).trim_end().to_string());
            }
            parts.extend(force_split(word, max_len));
            continue;
        }

        current.push_str(word);
    }

    if !current.trim_end().is_empty() {
        parts.push(current.trim_end().to_string());
    }

    parts
}

/// Split a single over-length token at UTF-8 char boundaries.
fn force_split(token: &str, max_len: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut chunk = String::new();
    for c in token.chars() {
        if chunk.chars().count() >= max_len {
            out.push(std::mem::take(&mut chunk));
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        out.push(chunk);
    }
    out
}
