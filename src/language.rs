//! Language tags and bilingual text heuristics

use std::fmt;

/// Detected or target language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    /// Mandarin Chinese
    Zh,
    /// English
    En,
    /// Anything else the recognizer reports
    Other,
}

impl Language {
    /// Map a recognizer language code (`"zh"`, `"en"`, `"zh-CN"`, `"chinese"`, ...)
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        let code = code.trim().to_lowercase();
        let primary = code.split(['-', '_']).next().unwrap_or_default();
        match primary {
            "zh" | "cmn" | "chinese" | "mandarin" => Self::Zh,
            "en" | "eng" | "english" => Self::En,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Zh => "zh",
            Self::En => "en",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// CJK unified ideograph (U+4E00..=U+9FFF)
#[must_use]
pub const fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}')
}

/// Count of CJK ideographs and ASCII letters
#[must_use]
pub fn script_counts(text: &str) -> (usize, usize) {
    text.chars().fold((0, 0), |(zh, en), c| {
        if is_cjk(c) {
            (zh + 1, en)
        } else if c.is_ascii_alphabetic() {
            (zh, en + 1)
        } else {
            (zh, en)
        }
    })
}

/// Primary language of user text: Chinese when ideographs are at least
/// `max(3, letters)`, otherwise English
#[must_use]
pub fn primary_language(text: &str) -> Language {
    let (zh, en) = script_counts(text);
    if zh >= en.max(3) {
        Language::Zh
    } else {
        Language::En
    }
}

/// Language to reply in, given the recognizer tag and the transcript text
#[must_use]
pub fn reply_language(detected: Language, text: &str) -> Language {
    match detected {
        Language::Zh | Language::En => detected,
        Language::Other => primary_language(text),
    }
}

/// Language of one output sentence, for voice selection
///
/// A sentence needs at least three ideographs and no clear Latin majority
/// to be voiced in Chinese; punctuation-only text inherits `fallback`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sentence_language(text: &str, fallback: Language) -> Language {
    let (zh, en) = script_counts(text);
    if zh >= 3 && zh as f32 * 1.2 >= en as f32 {
        Language::Zh
    } else if en > 0 {
        Language::En
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code() {
        assert_eq!(Language::from_code("zh"), Language::Zh);
        assert_eq!(Language::from_code("zh-CN"), Language::Zh);
        assert_eq!(Language::from_code("Chinese"), Language::Zh);
        assert_eq!(Language::from_code("en_US"), Language::En);
        assert_eq!(Language::from_code("ja"), Language::Other);
        assert_eq!(Language::from_code(""), Language::Other);
    }

    #[test]
    fn test_primary_language() {
        assert_eq!(primary_language("今天天气怎么样"), Language::Zh);
        assert_eq!(primary_language("what's the weather"), Language::En);
        // Two ideographs are not enough
        assert_eq!(primary_language("你好"), Language::En);
        assert_eq!(primary_language("用 Rust 写一个程序"), Language::Zh);
    }

    #[test]
    fn test_reply_language_trusts_recognizer() {
        assert_eq!(reply_language(Language::En, "今天天气怎么样"), Language::En);
        assert_eq!(reply_language(Language::Other, "今天天气怎么样"), Language::Zh);
        assert_eq!(reply_language(Language::Other, "bonjour"), Language::En);
    }

    #[test]
    fn test_sentence_language() {
        assert_eq!(sentence_language("好的。", Language::Zh), Language::Zh);
        assert_eq!(sentence_language("好的。", Language::En), Language::En);
        assert_eq!(sentence_language("今天很好。", Language::En), Language::Zh);
        assert_eq!(sentence_language("OK, 好的", Language::Zh), Language::En);
        assert_eq!(sentence_language("…", Language::Zh), Language::Zh);
    }
}
