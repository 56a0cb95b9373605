//! Lightweight language detection for `language = "auto"` requests.
//!
//! Script ranges decide Cyrillic and CJK text outright. Latin-script text is
//! scored by function-word frequency plus a few language-specific letters; a
//! language needs at least [`MIN_KEYWORD_MATCHES`] points and a strict lead,
//! otherwise the caller's default language wins.

use std::collections::HashMap;

pub const MIN_KEYWORD_MATCHES: usize = 2;

const KEYWORDS: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "and", "is", "are", "was", "of", "to", "in", "that", "it", "with", "for",
            "this", "you", "have", "not",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "ist", "nicht", "ein", "eine", "ich", "zu", "mit", "auf",
            "für", "sich", "auch", "es",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "et", "est", "une", "des", "du", "que", "pas", "pour", "dans",
            "qui", "sur", "avec", "je",
        ],
    ),
    (
        "es",
        &[
            "el", "los", "las", "y", "es", "que", "en", "una", "por", "para", "con", "no", "muy",
            "pero", "está", "como",
        ],
    ),
    (
        "it",
        &[
            "il", "lo", "gli", "che", "di", "è", "un", "una", "per", "non", "con", "sono", "del",
            "della", "anche", "questo",
        ],
    ),
    (
        "pt",
        &[
            "o", "os", "que", "não", "uma", "um", "é", "para", "com", "em", "do", "da", "mais",
            "por", "você", "isso",
        ],
    ),
    (
        "nl",
        &[
            "de", "het", "een", "en", "van", "is", "dat", "niet", "op", "te", "zijn", "met",
            "voor", "ik", "ook", "maar",
        ],
    ),
    (
        "pl",
        &[
            "i", "w", "nie", "się", "na", "to", "jest", "że", "z", "do", "jak", "ale", "co",
            "tak", "czy", "jestem",
        ],
    ),
];

const MARKER_LETTERS: &[(&str, &[char])] = &[
    ("de", &['ß', 'ä', 'ö', 'ü']),
    ("fr", &['ç', 'œ', 'ê', 'è', 'ë', 'î']),
    ("es", &['ñ', '¿', '¡']),
    ("pt", &['ã', 'õ']),
    ("pl", &['ą', 'ę', 'ł', 'ś', 'ż', 'ź', 'ń']),
];

#[derive(Default, Debug)]
struct ScriptCounts {
    latin: usize,
    cyrillic: usize,
    ukrainian: usize,
    han: usize,
    kana: usize,
    hangul: usize,
}

fn count_scripts(text: &str) -> ScriptCounts {
    let mut counts = ScriptCounts::default();
    for c in text.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '\u{00C0}'..='\u{024F}' => counts.latin += 1,
            'і' | 'ї' | 'є' | 'ґ' | 'І' | 'Ї' | 'Є' | 'Ґ' => {
                counts.cyrillic += 1;
                counts.ukrainian += 1;
            }
            '\u{0400}'..='\u{04FF}' => counts.cyrillic += 1,
            '\u{3040}'..='\u{30FF}' => counts.kana += 1,
            '\u{AC00}'..='\u{D7AF}' => counts.hangul += 1,
            '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' => counts.han += 1,
            _ => {}
        }
    }
    counts
}

/// Detect the base language code of `text`, falling back to `default_language`
pub fn detect_language(text: &str, default_language: &str) -> String {
    let counts = count_scripts(text);
    let cjk = counts.han + counts.kana + counts.hangul;

    if counts.cyrillic > counts.latin && counts.cyrillic >= cjk && counts.cyrillic > 0 {
        return if counts.ukrainian > 0 { "uk" } else { "ru" }.to_string();
    }
    if cjk > counts.latin && cjk > 0 {
        if counts.kana > 0 {
            return "ja".to_string();
        }
        if counts.hangul > counts.han {
            return "ko".to_string();
        }
        return "zh".to_string();
    }

    score_latin(text).unwrap_or_else(|| default_language.to_string())
}

fn score_latin(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    let mut scores: HashMap<&str, usize> = HashMap::new();

    for word in lowered.split(|c: char| !c.is_alphabetic()) {
        if word.is_empty() {
            continue;
        }
        for (lang, words) in KEYWORDS {
            if words.contains(&word) {
                *scores.entry(*lang).or_default() += 1;
            }
        }
    }
    for c in lowered.chars() {
        for (lang, letters) in MARKER_LETTERS {
            if letters.contains(&c) {
                *scores.entry(*lang).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<(&str, usize)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    match ranked.as_slice() {
        [(lang, best), rest @ ..]
            if *best >= MIN_KEYWORD_MATCHES && rest.first().map_or(true, |r| r.1 < *best) =>
        {
            Some(lang.to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_greeting_uses_default() {
        assert_eq!(detect_language("Hello. World!", "en"), "en");
        assert_eq!(detect_language("Hello. World!", "de"), "de");
    }

    #[test]
    fn test_english_keywords() {
        assert_eq!(
            detect_language("This is the answer and it was not easy to find.", "de"),
            "en"
        );
    }

    #[test]
    fn test_german_keywords_and_letters() {
        assert_eq!(
            detect_language("Das ist nicht die Straße, auf der ich wohne.", "en"),
            "de"
        );
    }

    #[test]
    fn test_cyrillic_scripts() {
        assert_eq!(detect_language("Привет, как дела?", "en"), "ru");
        assert_eq!(detect_language("Привіт, як справи? Їжак.", "en"), "uk");
    }

    #[test]
    fn test_cjk_scripts() {
        assert_eq!(detect_language("你好，世界", "en"), "zh");
        assert_eq!(detect_language("こんにちは世界", "en"), "ja");
        assert_eq!(detect_language("안녕하세요", "en"), "ko");
    }

    #[test]
    fn test_inconclusive_falls_back_to_default() {
        assert_eq!(detect_language("xyz qrs", "fr"), "fr");
        // "que" scores equally for French, Spanish and Portuguese
        assert_eq!(detect_language("que que", "it"), "it");
    }
}
