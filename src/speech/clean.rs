//! Text cleanup before synthesis
//!
//! Small models stutter and over-punctuate; TTS engines read those artifacts
//! aloud. Cleanup only touches speech output, never the logged reply.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::language::is_cjk;

/// Runs of sentence or clause punctuation
static PUNCTUATION_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[。！？!?，,]{2,}").expect("valid regex"));

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Longest word checked for stutter ("the the")
const MAX_STUTTER_WORD: usize = 10;

/// Normalize a sentence for synthesis
#[must_use]
pub fn clean_for_tts(text: &str) -> String {
    let text = collapse_repeated_punctuation(text);
    let text = remove_cjk_spacing(&text);
    let text = collapse_stutter(&text);
    let text = collapse_cjk_repeats(&text);
    text.trim().to_string()
}

/// Whether synthesis would produce anything audible
#[must_use]
pub fn is_speakable(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

/// "？？？" becomes "？"; a mixed run such as "?!" is kept
fn collapse_repeated_punctuation(text: &str) -> String {
    PUNCTUATION_RUN
        .replace_all(text, |caps: &Captures| {
            let mut run = caps[0].chars().collect::<Vec<_>>();
            run.dedup();
            run.into_iter().collect::<String>()
        })
        .into_owned()
}

fn remove_cjk_spacing(text: &str) -> String {
    WHITESPACE_RUN
        .replace_all(text, |caps: &Captures| {
            let Some(m) = caps.get(0) else {
                return String::new();
            };
            let before = text[..m.start()].chars().next_back().is_some_and(is_cjk);
            let after = text[m.end()..].chars().next().is_some_and(is_cjk);
            if before && after {
                String::new()
            } else {
                m.as_str().to_string()
            }
        })
        .into_owned()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Leading run of word characters
fn word_core(token: &str) -> &str {
    let end = token
        .char_indices()
        .find(|&(_, c)| !is_word_char(c))
        .map_or(token.len(), |(i, _)| i);
    &token[..end]
}

fn collapse_stutter(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // Lowercased previous token, when it was a bare word
    let mut prev_word: Option<String> = None;

    let mut rest = text;
    while !rest.is_empty() {
        let sep_len = rest
            .char_indices()
            .find(|&(_, c)| !c.is_whitespace())
            .map_or(rest.len(), |(i, _)| i);
        let (sep, tail) = rest.split_at(sep_len);
        let token_len = tail
            .char_indices()
            .find(|&(_, c)| c.is_whitespace())
            .map_or(tail.len(), |(i, _)| i);
        let (token, tail) = tail.split_at(token_len);
        rest = tail;

        if token.is_empty() {
            out.push_str(sep);
            break;
        }

        let core = word_core(token);
        let core_chars = core.chars().count();
        let repeats = !sep.is_empty()
            && (1..=MAX_STUTTER_WORD).contains(&core_chars)
            && prev_word.as_deref() == Some(core.to_lowercase().as_str());

        if repeats {
            // Keep the first occurrence and whatever trails the repeat
            let trailing = &token[core.len()..];
            out.push_str(trailing);
            if !trailing.is_empty() {
                prev_word = None;
            }
            continue;
        }

        out.push_str(sep);
        out.push_str(token);
        prev_word = (core.len() == token.len() && core_chars <= MAX_STUTTER_WORD)
            .then(|| core.to_lowercase());
    }
    out
}

fn collapse_cjk_repeats(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev = None;
    let mut run = 0;
    for c in text.chars() {
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        if is_cjk(c) && run > 2 {
            continue;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_repeated_punctuation() {
        assert_eq!(clean_for_tts("真的吗？？？"), "真的吗？");
        assert_eq!(clean_for_tts("Wow!!! Really??"), "Wow! Really?");
        assert_eq!(clean_for_tts("What?!"), "What?!");
        assert_eq!(clean_for_tts("好，，然后"), "好，然后");
    }

    #[test]
    fn test_removes_spaces_between_ideographs() {
        assert_eq!(clean_for_tts("你 好 世界"), "你好世界");
        assert_eq!(clean_for_tts("我用 Rust 写"), "我用 Rust 写");
        assert_eq!(clean_for_tts("你  \t 好"), "你好");
    }

    #[test]
    fn test_collapses_english_stutter() {
        assert_eq!(clean_for_tts("I I think the the answer"), "I think the answer");
        assert_eq!(clean_for_tts("it is the The end."), "it is the end.");
        assert_eq!(clean_for_tts("the then"), "the then");
        assert_eq!(clean_for_tts("go go go"), "go");
        assert_eq!(clean_for_tts("yes yes."), "yes.");
    }

    #[test]
    fn test_collapses_long_ideograph_runs() {
        assert_eq!(clean_for_tts("哈哈哈哈哈"), "哈哈");
        assert_eq!(clean_for_tts("谢谢你"), "谢谢你");
    }

    #[test]
    fn test_is_speakable() {
        assert!(is_speakable("好"));
        assert!(is_speakable("ok"));
        assert!(!is_speakable("……！"));
        assert!(!is_speakable("  "));
    }
}
