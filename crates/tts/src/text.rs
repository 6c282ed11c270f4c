//! Text preparation for synthesis
//!
//! Sanitization strips combining marks (U+0300..U+036F) and collapses
//! whitespace; chunking honors min/max chunk size, the response-length bound
//! (truncated at a sentence boundary), and the intro bound (truncated at a
//! word boundary).

use unicode_segmentation::UnicodeSegmentation;

use voicehub_config::StagedTtsConfig;

/// Characters that end a sentence for chunking purposes
const SENTENCE_TERMINATORS: [char; 5] = ['.', '!', '?', ':', ';'];

/// Remove combining marks, drop control characters, and collapse whitespace.
///
/// The combining-marks range U+0300..=U+036F is stripped outright; engines
/// receive precomposed text only.
pub fn sanitize(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !('\u{0300}'..='\u{036F}').contains(c))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Light prosody normalization: collapse ellipsis runs and guarantee a
/// terminal punctuation mark so engines produce a natural final contour.
pub fn apply_prosody_hints(text: &str) -> String {
    let mut out = text.replace("...", "…");
    while out.contains("……") {
        out = out.replace("……", "…");
    }
    let trimmed = out.trim_end().to_string();
    match trimmed.chars().last() {
        Some(c) if SENTENCE_TERMINATORS.contains(&c) || c == '…' => trimmed,
        Some(_) => format!("{trimmed}."),
        None => trimmed,
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn take_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Bound `text` to `max_chars`, preferring the last sentence boundary within
/// the bound and falling back to the last word boundary.
pub fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    if char_len(text) <= max_chars {
        return text.to_string();
    }
    let head = take_chars(text, max_chars);

    if let Some(pos) = head.rfind(|c| SENTENCE_TERMINATORS.contains(&c)) {
        let cut = &head[..=pos];
        if !cut.trim().is_empty() {
            return cut.trim().to_string();
        }
    }
    match head.unicode_word_indices().last() {
        Some((idx, word)) => head[..idx + word.len()].trim().to_string(),
        None => head.trim().to_string(),
    }
}

/// Split an intro of at most `max_intro` characters at a word boundary.
/// Returns `(intro, remainder)`.
pub fn split_intro(text: &str, max_intro: usize) -> (String, String) {
    if char_len(text) <= max_intro {
        return (text.trim().to_string(), String::new());
    }
    let head = take_chars(text, max_intro);
    let cut = match head.unicode_word_indices().last() {
        // Cut before the final (possibly clipped) word so the intro never
        // ends mid-word.
        Some((idx, _)) if idx > 0 => idx,
        _ => head.len(),
    };
    let intro = text[..cut].trim().to_string();
    let rest = text[cut..].trim().to_string();
    if intro.is_empty() {
        (rest, String::new())
    } else {
        (intro, rest)
    }
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if SENTENCE_TERMINATORS.contains(&c) {
            let boundary = chars.peek().map_or(true, |next| next.is_whitespace());
            if boundary && !current.trim().is_empty() {
                sentences.push(current.trim().to_string());
                current.clear();
            }
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    sentences
}

fn split_long_sentence(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let needed = if current.is_empty() {
            char_len(word)
        } else {
            char_len(&current) + 1 + char_len(word)
        };
        if needed > max_chars && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Pack sentences into chunks of `min_chars..=max_chars`, at most
/// `max_chunks` chunks. Overflow past the last chunk is dropped; the caller
/// bounds the body length beforehand so this is a final guard.
pub fn chunk_body(text: &str, min_chars: usize, max_chars: usize, max_chunks: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() || max_chunks == 0 {
        return Vec::new();
    }

    let mut pieces = Vec::new();
    for sentence in split_sentences(text) {
        if char_len(&sentence) > max_chars {
            pieces.extend(split_long_sentence(&sentence, max_chars));
        } else {
            pieces.push(sentence);
        }
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        let merged_len = if current.is_empty() {
            char_len(&piece)
        } else {
            char_len(&current) + 1 + char_len(&piece)
        };

        if !current.is_empty() && (merged_len > max_chars || char_len(&current) >= min_chars) {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&piece);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    if chunks.len() > max_chunks {
        tracing::debug!(
            dropped = chunks.len() - max_chunks,
            "Chunk plan exceeded limit, dropping tail chunks"
        );
        chunks.truncate(max_chunks);
    }
    chunks
}

/// The prepared text plan for one reply
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    /// Intro text for the fast engine; `None` when staging is off
    pub intro: Option<String>,
    /// Main-body chunks in emission order
    pub main: Vec<String>,
}

impl ChunkPlan {
    /// Prepare a reply: sanitize, bound, and split per configuration.
    /// `staged` selects whether an intro is carved out.
    pub fn prepare(text: &str, config: &StagedTtsConfig, staged: bool) -> ChunkPlan {
        let clean = apply_prosody_hints(&sanitize(text));
        let bounded = truncate_at_sentence(&clean, config.max_response_length);

        if !staged {
            let main = chunk_body(
                &bounded,
                config.min_chunk_chars,
                config.max_chunk_chars,
                config.max_chunks_forced.max(config.max_chunks),
            );
            return ChunkPlan { intro: None, main };
        }

        let (intro, rest) = split_intro(&bounded, config.max_intro_length);
        let main = chunk_body(
            &rest,
            config.min_chunk_chars,
            config.max_chunk_chars,
            config.max_chunks,
        );
        ChunkPlan {
            intro: Some(intro),
            main,
        }
    }

    pub fn total_chunks(&self) -> u32 {
        (self.intro.iter().len() + self.main.len()) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.intro.as_deref().map_or(true, str::is_empty) && self.main.is_empty()
    }
}
