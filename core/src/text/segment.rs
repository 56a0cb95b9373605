//! Bounded-length segmentation for streaming synthesis.
//!
//! Sentences are split on terminal punctuation and packed greedily up to
//! `max_chunk_chars`. A sentence that is still too long is cut at the last
//! clause mark inside the window, then at the last whitespace. A run with no
//! break at all is emitted oversized instead of being cut mid-token, except for
//! CJK languages where any character boundary is a safe cut.
//!
//! Chunks are byte ranges of the sanitized input: the text between two
//! consecutive chunks is whitespace only, so no text is ever dropped.

use crate::config::TextConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One unit of synthesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub index: usize,
    /// Byte offset of `text` inside the sanitized input
    pub offset: usize,
    pub text: String,
}

impl TextChunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？' | '…')
}

// Terminals that end a sentence without trailing whitespace
fn is_fullwidth_terminal(c: char) -> bool {
    matches!(c, '。' | '！' | '？')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '」' | '』' | '）')
}

fn is_clause(c: char) -> bool {
    matches!(c, ',' | ';' | ':' | '，' | '；' | '：' | '、')
}

fn is_cjk_language(language: &str) -> bool {
    matches!(language, "zh" | "ja" | "ko")
}

/// Whether `text` should be synthesized in several chunks
pub fn should_segment(text: &str, config: &TextConfig) -> bool {
    let len = text.chars().count();
    if len > config.stream_threshold_chars {
        return true;
    }
    len > config.max_chunk_chars && sentence_spans(text).len() > 1
}

/// Single chunk for short text, bounded chunks otherwise
pub fn plan_chunks(text: &str, language: &str, config: &TextConfig) -> Vec<TextChunk> {
    if should_segment(text, config) {
        segment(text, language, config)
    } else {
        vec![TextChunk {
            index: 0,
            offset: 0,
            text: text.to_string(),
        }]
    }
}

/// Split `text` into ordered chunks of at most `max_chunk_chars` characters
pub fn segment(text: &str, language: &str, config: &TextConfig) -> Vec<TextChunk> {
    let max = config.max_chunk_chars.max(1);
    let hard_split = is_cjk_language(language);

    let mut spans = Vec::new();
    for (start, end) in pack(text, sentence_spans(text), max) {
        if char_count(&text[start..end]) <= max {
            spans.push((start, end));
        } else {
            spans.extend(split_long(text, start, end, max, hard_split));
        }
    }

    let chunks: Vec<TextChunk> = spans
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| TextChunk {
            index,
            offset: start,
            text: text[start..end].to_string(),
        })
        .collect();
    debug!(target: "segmenter", chunks = chunks.len(), chars = char_count(text), "Segmented text");
    chunks
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

/// Byte ranges of sentences, trimmed of surrounding whitespace
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut last_end = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '\n' {
            if let Some(s) = start.take() {
                spans.push((s, last_end));
            }
            continue;
        }
        if c.is_whitespace() {
            continue;
        }
        if start.is_none() {
            start = Some(i);
        }
        last_end = i + c.len_utf8();

        if is_terminal(c) {
            while let Some(&(j, n)) = chars.peek() {
                if is_terminal(n) || is_closer(n) {
                    last_end = j + n.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let boundary = is_fullwidth_terminal(c)
                || chars.peek().map_or(true, |&(_, n)| n.is_whitespace());
            if boundary {
                if let Some(s) = start.take() {
                    spans.push((s, last_end));
                }
            }
        }
    }
    if let Some(s) = start {
        spans.push((s, last_end));
    }
    spans
}

/// Greedily merge adjacent sentences while the merged range fits in `max`
fn pack(text: &str, spans: Vec<(usize, usize)>, max: usize) -> Vec<(usize, usize)> {
    let mut packed: Vec<(usize, usize)> = Vec::new();
    for (start, end) in spans {
        if let Some(last) = packed.last_mut() {
            if char_count(&text[last.0..end]) <= max {
                last.1 = end;
                continue;
            }
        }
        packed.push((start, end));
    }
    packed
}

/// Cut one oversized sentence; every iteration consumes at least one character
fn split_long(
    text: &str,
    start: usize,
    end: usize,
    max: usize,
    hard_split: bool,
) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut s = start;

    loop {
        while let Some(c) = text[s..end].chars().next() {
            if c.is_whitespace() {
                s += c.len_utf8();
            } else {
                break;
            }
        }
        if s >= end {
            break;
        }
        let piece = &text[s..end];
        if char_count(piece) <= max {
            out.push((s, end));
            break;
        }

        // byte offset just past `max` characters, and past the character after that
        let limit = s + piece.char_indices().nth(max).map_or(piece.len(), |(i, _)| i);
        let scan_end = limit + text[limit..end].chars().next().map_or(0, |c| c.len_utf8());

        let window = &text[s..limit];
        let cut = window
            .char_indices()
            .filter(|&(i, c)| i > 0 && is_clause(c))
            .last()
            .map(|(i, c)| s + i + c.len_utf8())
            .or_else(|| {
                text[s..scan_end]
                    .char_indices()
                    .filter(|&(i, c)| i > 0 && c.is_whitespace())
                    .last()
                    .map(|(i, _)| s + i)
            })
            .or(if hard_split { Some(limit) } else { None })
            .unwrap_or_else(|| {
                // unbreakable run: extend to the next break or the end
                text[limit..end]
                    .char_indices()
                    .find(|&(_, c)| c.is_whitespace() || is_clause(c))
                    .map(|(i, c)| {
                        if c.is_whitespace() {
                            limit + i
                        } else {
                            limit + i + c.len_utf8()
                        }
                    })
                    .unwrap_or(end)
            });

        let chunk_end = s + text[s..cut].trim_end().len();
        if chunk_end > s {
            out.push((s, chunk_end));
        }
        s = cut;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max: usize, threshold: usize) -> TextConfig {
        TextConfig {
            max_chunk_chars: max,
            stream_threshold_chars: threshold,
            ascii_only_languages: vec!["en".to_string()],
        }
    }

    /// Every chunk maps back onto the input and only whitespace lies between chunks
    fn assert_lossless(text: &str, chunks: &[TextChunk]) {
        let mut cursor = 0usize;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.offset >= cursor);
            assert!(text[cursor..chunk.offset].chars().all(char::is_whitespace));
            assert_eq!(&text[chunk.offset..chunk.offset + chunk.text.len()], chunk.text);
            cursor = chunk.offset + chunk.text.len();
        }
        assert!(text[cursor..].chars().all(char::is_whitespace));
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = plan_chunks("Hello. World!", "en", &cfg(200, 2_000));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello. World!");
    }

    #[test]
    fn test_sentences_packed_up_to_limit() {
        let text = "One two three. Four five six! Seven eight nine? Ten.";
        let chunks = segment(text, "en", &cfg(30, 2_000));
        assert_lossless(text, &chunks);
        assert_eq!(chunks[0].text, "One two three. Four five six!");
        assert!(chunks.iter().all(|c| c.char_len() <= 30));
    }

    #[test]
    fn test_decimal_point_is_not_a_boundary() {
        let spans = sentence_spans("Pi is 3.14 today. Yes.");
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn test_long_sentence_splits_at_clause_then_whitespace() {
        let text = "alpha beta gamma, delta epsilon zeta eta theta iota kappa lambda mu";
        let chunks = segment(text, "en", &cfg(20, 2_000));
        assert_lossless(text, &chunks);
        assert_eq!(chunks[0].text, "alpha beta gamma,");
        assert!(chunks.iter().all(|c| c.char_len() <= 20));
    }

    #[test]
    fn test_unbreakable_token_is_emitted_oversized() {
        let token = "x".repeat(50);
        let text = format!("short words {} tail", token);
        let chunks = segment(&text, "en", &cfg(20, 2_000));
        assert_lossless(&text, &chunks);
        assert!(chunks.iter().any(|c| c.text == token));
        for c in &chunks {
            if c.text != token {
                assert!(c.char_len() <= 20);
            }
        }
    }

    #[test]
    fn test_cjk_hard_splits() {
        let text = "字".repeat(45);
        let chunks = segment(&text, "zh", &cfg(20, 2_000));
        assert_lossless(&text, &chunks);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.char_len() <= 20));
    }

    #[test]
    fn test_fullwidth_terminals_split_without_spaces() {
        let spans = sentence_spans("你好。世界！再见");
        assert_eq!(spans.len(), 3);
    }

    #[test]
    fn test_newlines_end_sentences() {
        let text = "Heading\nBody text here.";
        assert_eq!(sentence_spans(text), vec![(0, 7), (8, 23)]);
    }

    #[test]
    fn test_streaming_threshold_forces_segmentation() {
        let sentence = "This sentence is exactly long enough to matter here. ";
        let text = sentence.repeat(50);
        let text = text.trim();
        let config = cfg(200, 2_000);
        assert!(should_segment(text, &config));
        let chunks = plan_chunks(text, "en", &config);
        assert!(chunks.len() > 1);
        assert_lossless(text, &chunks);
        assert!(chunks.iter().all(|c| c.char_len() <= 200));
    }

    #[test]
    fn test_multi_sentence_long_text_segments() {
        let text = format!("{}. {}.", "a ".repeat(120).trim(), "b ".repeat(10).trim());
        let config = cfg(200, 2_000);
        assert!(should_segment(&text, &config));
        assert!(!should_segment(&"a ".repeat(150), &config));
    }
}
