//! Text sanitization ahead of phonemization.
//!
//! The phonemizer rejects or mispronounces a number of typographic and symbol
//! characters. Sanitization folds typography to ASCII, strips invisible and
//! control characters, blanks out symbol classes and finally applies a
//! per-language character whitelist:
//! - ASCII-only languages keep printable ASCII plus newline/tab
//! - all other languages keep Unicode letters, numbers, punctuation and separators
//!
//! `sanitize` is idempotent.

use crate::config::TextConfig;
use crate::{Result, TtsError};
use once_cell::sync::Lazy;
use regex::Regex;

// Arrows, bullets/geometric shapes, currency and math operators
static SYMBOLS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[\p{Sc}\x{2190}-\x{21FF}\x{27F0}-\x{27FF}\x{2900}-\x{297F}\x{2B00}-\x{2BFF}\x{2200}-\x{22FF}\x{25A0}-\x{25FF}\x{2022}\x{2023}\x{2043}\x{2605}\x{2606}\x{00D7}\x{00F7}\x{00B1}]",
    )
    .expect("symbol class regex")
});

static NOT_SPEAKABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\p{P}\p{Z}\n\t]").expect("category regex"));

static SPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").expect("space regex"));

static SPACE_AROUND_NEWLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" *\n *").expect("newline regex"));

static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank line regex"));

/// Sanitize `text` for synthesis in `language` (base code, e.g. `en`).
///
/// Fails with [`TtsError::EmptyText`] when nothing speakable remains.
pub fn sanitize(text: &str, language: &str, config: &TextConfig) -> Result<String> {
    let ascii_only = config
        .ascii_only_languages
        .iter()
        .any(|l| l.eq_ignore_ascii_case(language));
    finish(text, ascii_only)
}

/// Sanitize with the ASCII whitelist regardless of language
pub fn sanitize_strict(text: &str) -> Result<String> {
    finish(text, true)
}

fn finish(text: &str, ascii_only: bool) -> Result<String> {
    let folded = fold_typography(text);
    let without_symbols = SYMBOLS.replace_all(&folded, " ");

    let whitelisted: String = if ascii_only {
        without_symbols
            .chars()
            .map(|c| {
                if c == '\n' || c == '\t' || (' '..='~').contains(&c) {
                    c
                } else {
                    ' '
                }
            })
            .collect()
    } else {
        NOT_SPEAKABLE.replace_all(&without_symbols, " ").into_owned()
    };

    let collapsed = SPACE_RUNS.replace_all(&whitelisted, " ");
    let collapsed = SPACE_AROUND_NEWLINE.replace_all(&collapsed, "\n");
    let collapsed = BLANK_LINES.replace_all(&collapsed, "\n\n");
    let out = collapsed.trim_matches(|c: char| c == ' ' || c == '\n' || c == '\t');

    if out.is_empty() {
        return Err(TtsError::EmptyText);
    }
    Ok(out.to_string())
}

/// Line endings, invisible characters, typographic punctuation and control characters
fn fold_typography(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            // zero-width and soft hyphen
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}' => {}
            // non-breaking and narrow spaces
            '\u{00A0}' | '\u{202F}' | '\u{2007}' | '\u{2009}' | '\u{200A}' | '\u{3000}' => {
                out.push(' ')
            }
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' | '\u{02BC}' => {
                out.push('\'')
            }
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' | '\u{00AB}'
            | '\u{00BB}' => out.push('"'),
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
            | '\u{2212}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\n' | '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TextConfig {
        TextConfig {
            max_chunk_chars: 200,
            stream_threshold_chars: 2_000,
            ascii_only_languages: vec!["en".to_string()],
        }
    }

    #[test]
    fn test_folds_typography() {
        let out = sanitize("\u{201C}Wait\u{201D} \u{2014} it\u{2019}s\u{2026}", "en", &cfg()).unwrap();
        assert_eq!(out, "\"Wait\" - it's...");
    }

    #[test]
    fn test_strips_invisible_and_control() {
        let out = sanitize("a\u{200B}b\u{00A0}c\u{0007}d\r\ne", "en", &cfg()).unwrap();
        assert_eq!(out, "ab cd\ne");
    }

    #[test]
    fn test_removes_symbol_classes() {
        let out = sanitize("Price \u{2192} 5\u{20AC} \u{2022} x \u{2264} y", "en", &cfg()).unwrap();
        assert_eq!(out, "Price 5 x y");
    }

    #[test]
    fn test_ascii_only_language_blanks_non_ascii() {
        let out = sanitize("caf\u{00E9} ok", "en", &cfg()).unwrap();
        assert_eq!(out, "caf ok");
    }

    #[test]
    fn test_other_languages_keep_letters() {
        let out = sanitize("Привет, мир! \u{1F600} Ça va?", "ru", &cfg()).unwrap();
        assert_eq!(out, "Привет, мир! Ça va?");
    }

    #[test]
    fn test_tabs_preserved() {
        let out = sanitize("a\tb", "de", &cfg()).unwrap();
        assert_eq!(out, "a\tb");
    }

    #[test]
    fn test_empty_after_sanitization() {
        let err = sanitize("\u{200B} \u{2192} \u{20AC}", "en", &cfg()).unwrap_err();
        assert!(matches!(err, TtsError::EmptyText));
        assert!(matches!(sanitize("", "fr", &cfg()), Err(TtsError::EmptyText)));
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "  \u{201E}Hallo\u{201C}  \u{2013}  Welt\u{2026}\n\n\n\nNeu  ",
            "\u{00AB}Bonjour\u{00BB} \u{2192} \u{00E0} bient\u{00F4}t \u{2605}",
            "Line one \r\n  line two\t\u{0001}end",
            "\u{4F60}\u{597D}\u{3002}\u{3000}\u{4E16}\u{754C}\u{FF01}",
        ];
        for input in inputs {
            for lang in ["en", "de", "zh"] {
                // CJK input has nothing left under the ASCII whitelist
                let Ok(once) = sanitize(input, lang, &cfg()) else {
                    continue;
                };
                let twice = sanitize(&once, lang, &cfg()).unwrap();
                assert_eq!(once, twice, "input {:?} lang {}", input, lang);
            }
        }
    }

    #[test]
    fn test_strict_matches_ascii_mode() {
        assert_eq!(sanitize_strict("na\u{00EF}ve").unwrap(), "na ve");
    }
}
