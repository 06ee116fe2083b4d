//! Token-bounded text chunking along paragraph/sentence/word boundaries.
//!
//! The token estimate is a cheap approximation (word count + punctuation
//! characters + whitespace/4), not true tokenization; the remote embedding
//! backend tolerates the slack.

/// Estimate the token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    let whitespace = text.chars().filter(|c| c.is_whitespace()).count();
    words + punctuation + whitespace / 4
}

/// Split `text` into pieces each estimating at most `max_tokens`.
///
/// Text already under the bound comes back as a single piece. Oversized text
/// is split along blank-line paragraph boundaries, packing greedily; a
/// paragraph that alone exceeds the bound falls back to sentence boundaries,
/// then to whitespace-separated words. A single word longer than the bound is
/// kept whole — it cannot be split further. Empty fragments are dropped.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if estimate_tokens(trimmed) <= max_tokens {
        return vec![trimmed.to_string()];
    }

    let paragraphs: Vec<&str> = trimmed
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    pack(&paragraphs, "\n\n", max_tokens, |paragraph, max| {
        let sentences = split_sentences(paragraph);
        pack(&sentences, " ", max, |sentence, max| {
            let words: Vec<&str> = sentence.split_whitespace().collect();
            pack(&words, " ", max, |word, _| vec![word.to_string()])
        })
    })
}

/// Greedily pack `units` into chunks of at most `max_tokens`, recursing via
/// `split_oversized` for units that alone exceed the bound.
fn pack<S: AsRef<str>>(
    units: &[S],
    separator: &str,
    max_tokens: usize,
    split_oversized: impl Fn(&str, usize) -> Vec<String>,
) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for unit in units {
        let unit = unit.as_ref();

        if estimate_tokens(unit) > max_tokens {
            flush(&mut chunks, &mut current);
            chunks.extend(split_oversized(unit, max_tokens));
            continue;
        }

        if current.is_empty() {
            current.push_str(unit);
        } else {
            let candidate_len = estimate_tokens(&current)
                + estimate_tokens(separator)
                + estimate_tokens(unit)
                + 1;
            if candidate_len > max_tokens {
                flush(&mut chunks, &mut current);
                current.push_str(unit);
            } else {
                current.push_str(separator);
                current.push_str(unit);
            }
        }
    }

    flush(&mut chunks, &mut current);
    chunks
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    current.clear();
}

/// Split a paragraph into sentences on `.`, `!`, `?` followed by whitespace.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_none_or(|next| next.is_whitespace()) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

/// Deterministically truncate `text` so its estimate fits `max_tokens`,
/// keeping whole words and normalizing inner whitespace to single spaces.
pub fn truncate_to_estimate(text: &str, max_tokens: usize) -> String {
    let mut out = String::new();
    let mut words = 0usize;
    let mut punctuation = 0usize;
    let mut whitespace = 0usize;

    for word in text.split_whitespace() {
        let word_punct = word.chars().filter(|c| c.is_ascii_punctuation()).count();
        let next_words = words + 1;
        let next_punct = punctuation + word_punct;
        let next_ws = whitespace + usize::from(!out.is_empty());

        if next_words + next_punct + next_ws / 4 > max_tokens {
            break;
        }

        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        words = next_words;
        punctuation = next_punct;
        whitespace = next_ws;
    }

    out
}
