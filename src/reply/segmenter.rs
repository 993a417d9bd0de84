//! Streaming sentence segmentation
//!
//! Boundaries:
//! - `。！？` end a sentence wherever they appear.
//! - `.` `!` `?` `…` end a sentence only when followed by whitespace or an
//!   ideograph, so "3.5" and "e.g" stay intact.
//! - Closing quotes and brackets after a terminator stay with the sentence.
//! - A boundary is confirmed by the character after it; text at the very end
//!   of the buffer waits for the next increment (or [`SentenceSegmenter::finish`]).
//! - Unterminated text longer than `max_chars` is split after the last clause
//!   mark or space within the limit, or hard-cut at the limit.

use crate::language::{Language, is_cjk, sentence_language};
use crate::providers::TokenIncrement;

/// One complete unit of reply text, tagged for voice selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    /// Emission order within the turn
    pub index: usize,
    /// Trimmed sentence text
    pub text: String,
    pub language: Language,
}

fn is_full_stop(c: char) -> bool {
    matches!(c, '。' | '！' | '？')
}

fn is_ascii_stop(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

fn is_closer(c: char) -> bool {
    matches!(
        c,
        '"' | '\'' | '”' | '’' | '」' | '』' | '）' | ')' | ']' | '》'
    )
}

fn is_clause_mark(c: char) -> bool {
    matches!(c, '，' | ',' | '、' | '；' | ';' | '：' | ':')
}

/// Byte offset just past the first confirmed sentence boundary
fn find_boundary(text: &str) -> Option<usize> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i].1;
        if !is_full_stop(c) && !is_ascii_stop(c) {
            i += 1;
            continue;
        }

        let mut cjk_terminated = is_full_stop(c);
        let mut end = i + 1;
        while end < chars.len() && (is_full_stop(chars[end].1) || is_ascii_stop(chars[end].1)) {
            cjk_terminated |= is_full_stop(chars[end].1);
            end += 1;
        }
        while end < chars.len() && is_closer(chars[end].1) {
            end += 1;
        }

        // Need one more character to know the run is over
        let Some(&(offset, next)) = chars.get(end) else {
            return None;
        };

        if cjk_terminated || next.is_whitespace() || is_cjk(next) {
            return Some(offset);
        }
        i = end;
    }

    None
}

/// Byte offset at which to split an over-long unterminated run
fn forced_cut(text: &str, max_chars: usize) -> usize {
    let limit = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(i, _)| i);

    text[..limit]
        .char_indices()
        .filter(|&(i, c)| i > 0 && (is_clause_mark(c) || c.is_whitespace()))
        .last()
        .map_or(limit, |(i, c)| i + c.len_utf8())
}

/// Turns a stream of token increments into sentences
#[derive(Debug)]
pub struct SentenceSegmenter {
    pending: String,
    language: Language,
    max_chars: usize,
    emitted: usize,
    next_increment: usize,
}

impl SentenceSegmenter {
    /// `language` is the reply language, used for sentences with no
    /// language signal of their own
    #[must_use]
    pub fn new(language: Language, max_chars: usize) -> Self {
        Self {
            pending: String::new(),
            language,
            max_chars: max_chars.max(1),
            emitted: 0,
            next_increment: 0,
        }
    }

    /// Append an increment and return every sentence it completes
    pub fn push(&mut self, increment: &TokenIncrement) -> Vec<Sentence> {
        if increment.index != self.next_increment {
            tracing::warn!(
                expected = self.next_increment,
                got = increment.index,
                "token increment out of sequence"
            );
        }
        self.next_increment = increment.index + 1;
        self.pending.push_str(&increment.text);

        let mut sentences = Vec::new();
        loop {
            let cut = match find_boundary(&self.pending) {
                Some(end) => end,
                None if self.pending.chars().count() > self.max_chars => {
                    forced_cut(&self.pending, self.max_chars)
                }
                None => break,
            };

            let rest = self.pending.split_off(cut);
            let chunk = std::mem::replace(&mut self.pending, rest);
            if let Some(sentence) = self.sentence(&chunk) {
                sentences.push(sentence);
            }
        }
        sentences
    }

    /// Flush whatever is left at end of stream
    pub fn finish(&mut self) -> Option<Sentence> {
        let chunk = std::mem::take(&mut self.pending);
        self.sentence(&chunk)
    }

    /// Sentences emitted so far
    #[must_use]
    pub const fn emitted(&self) -> usize {
        self.emitted
    }

    fn sentence(&mut self, chunk: &str) -> Option<Sentence> {
        let text = chunk.trim();
        if text.is_empty() {
            return None;
        }

        let sentence = Sentence {
            index: self.emitted,
            text: text.to_string(),
            language: sentence_language(text, self.language),
        };
        self.emitted += 1;
        tracing::trace!(index = sentence.index, text = %sentence.text, "sentence ready");
        Some(sentence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn increments(parts: &[&str]) -> Vec<TokenIncrement> {
        parts
            .iter()
            .enumerate()
            .map(|(index, text)| TokenIncrement {
                index,
                text: (*text).to_string(),
            })
            .collect()
    }

    fn segment(language: Language, max_chars: usize, parts: &[&str]) -> Vec<Sentence> {
        let mut segmenter = SentenceSegmenter::new(language, max_chars);
        let mut out: Vec<Sentence> = increments(parts)
            .iter()
            .flat_map(|inc| segmenter.push(inc))
            .collect();
        out.extend(segmenter.finish());
        out
    }

    fn texts(sentences: &[Sentence]) -> Vec<&str> {
        sentences.iter().map(|s| s.text.as_str()).collect()
    }

    fn without_whitespace(text: &str) -> String {
        text.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_english_increments() {
        let sentences = segment(Language::En, 80, &["Hello", " world.", " How are", " you?"]);
        assert_eq!(texts(&sentences), vec!["Hello world.", "How are you?"]);
        assert_eq!(sentences[0].index, 0);
        assert_eq!(sentences[1].index, 1);
    }

    #[test]
    fn test_sentence_held_until_next_increment() {
        let mut segmenter = SentenceSegmenter::new(Language::En, 80);
        let inc = increments(&["Done.", " Next"]);
        assert!(segmenter.push(&inc[0]).is_empty());
        assert_eq!(texts(&segmenter.push(&inc[1])), vec!["Done."]);
        assert_eq!(segmenter.finish().map(|s| s.text), Some("Next".to_string()));
    }

    #[test]
    fn test_chinese_punctuation() {
        let sentences = segment(Language::Zh, 80, &["今天天气", "很好。明天", "会下雨吗？", "我不确定"]);
        assert_eq!(
            texts(&sentences),
            vec!["今天天气很好。", "明天会下雨吗？", "我不确定"]
        );
        assert!(sentences.iter().all(|s| s.language == Language::Zh));
    }

    #[test]
    fn test_decimal_point_is_not_a_boundary() {
        let sentences = segment(Language::En, 80, &["It costs 3.5 dollars. Okay"]);
        assert_eq!(texts(&sentences), vec!["It costs 3.5 dollars.", "Okay"]);
    }

    #[test]
    fn test_closing_quote_stays_with_sentence() {
        let sentences = segment(Language::Zh, 80, &["他说：“好的。”然后", "走了。"]);
        assert_eq!(texts(&sentences), vec!["他说：“好的。”", "然后走了。"]);
    }

    #[test]
    fn test_repeated_terminators_stay_together() {
        let sentences = segment(Language::En, 80, &["Really?!", " Yes."]);
        assert_eq!(texts(&sentences), vec!["Really?!", "Yes."]);
    }

    #[test]
    fn test_long_run_splits_at_clause_mark() {
        let text = "这是一个非常长的句子，没有任何结束标点符号但是一直在说下去";
        let sentences = segment(Language::Zh, 12, &[text]);
        assert_eq!(sentences[0].text, "这是一个非常长的句子，");
        assert_eq!(
            without_whitespace(&sentences.iter().map(|s| s.text.as_str()).collect::<String>()),
            text
        );
        assert!(sentences.iter().all(|s| s.text.chars().count() <= 12));
    }

    #[test]
    fn test_long_run_without_marks_is_hard_cut() {
        let sentences = segment(Language::Zh, 5, &["一二三四五六七八"]);
        assert_eq!(texts(&sentences), vec!["一二三四五", "六七八"]);
    }

    #[test]
    fn test_mixed_sentence_languages() {
        let sentences = segment(Language::Zh, 80, &["我们用 Rust 写。", "It is fast. 好的"]);
        assert_eq!(sentences[0].language, Language::Zh);
        assert_eq!(sentences[1].language, Language::En);
        // Too few ideographs to switch voice; inherit the reply language
        assert_eq!(sentences[2].language, Language::Zh);
    }

    #[test]
    fn test_whitespace_only_input_emits_nothing() {
        assert!(segment(Language::En, 80, &["  ", "\n"]).is_empty());
    }

    #[test]
    fn test_concatenation_preserves_text_for_every_split() {
        let text = "Hi there. 今天很好！What about 3.14? 再见。Bye";
        let chars: Vec<char> = text.chars().collect();

        for a in 0..=chars.len() {
            for b in a..=chars.len() {
                let parts: Vec<String> = [&chars[..a], &chars[a..b], &chars[b..]]
                    .iter()
                    .map(|p| p.iter().collect())
                    .collect();
                let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
                let sentences = segment(Language::En, 80, &refs);
                let joined: String = sentences.iter().map(|s| s.text.as_str()).collect();
                assert_eq!(
                    without_whitespace(&joined),
                    without_whitespace(text),
                    "split at {a},{b}"
                );
                assert_eq!(
                    texts(&sentences),
                    vec!["Hi there.", "今天很好！", "What about 3.14?", "再见。", "Bye"],
                    "split at {a},{b}"
                );
            }
        }
    }
}
