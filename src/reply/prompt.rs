//! Prompt construction and canned phrases

use crate::language::Language;

const ZH_SYSTEM_PROMPT: &str = "你是一个语音助手。务必用中文回答，直接给结论，\
不要重复或改写用户的问题；若信息不足，只问一个最关键的澄清问题。\
每次回答不超过两句。";

const EN_SYSTEM_PROMPT: &str = "You are a voice assistant. Reply strictly in English. \
Do not repeat the user's question; answer directly. \
If info is missing, ask ONE short clarifying question. Max 2 sentences.";

/// A chat request for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// Language the reply must be in
    pub language: Language,
}

impl Prompt {
    /// Build the request for `user_text`, replying in `language`
    #[must_use]
    pub fn new(user_text: &str, language: Language) -> Self {
        Self {
            system: system_prompt(language).to_string(),
            user: user_text.trim().to_string(),
            language,
        }
    }
}

/// System prompt for replies in `language`
#[must_use]
pub const fn system_prompt(language: Language) -> &'static str {
    match language {
        Language::Zh => ZH_SYSTEM_PROMPT,
        Language::En | Language::Other => EN_SYSTEM_PROMPT,
    }
}

/// Spoken when a turn is abandoned
#[must_use]
pub const fn apology(language: Language) -> &'static str {
    match language {
        Language::Zh => "抱歉，我这边处理出了点问题。",
        Language::En | Language::Other => "Sorry, something went wrong on my end.",
    }
}

/// Spoken when the model returns nothing
#[must_use]
pub const fn acknowledgement(language: Language) -> &'static str {
    match language {
        Language::Zh => "好的。",
        Language::En | Language::Other => "Okay.",
    }
}

/// Spoken before the session ends
#[must_use]
pub const fn farewell(language: Language) -> &'static str {
    match language {
        Language::Zh => "再见！",
        Language::En | Language::Other => "Goodbye!",
    }
}

/// Whether `text` contains one of `phrases`
///
/// Latin phrases must match whole words ("stop" does not match "stopwatch");
/// phrases containing ideographs match anywhere.
#[must_use]
pub fn is_exit_request(text: &str, phrases: &[String]) -> bool {
    let words = normalize_words(text);
    let lowered = text.to_lowercase();

    phrases.iter().any(|phrase| {
        let phrase = phrase.trim().to_lowercase();
        if phrase.is_empty() {
            return false;
        }
        if phrase.chars().any(crate::language::is_cjk) {
            return lowered.contains(&phrase);
        }
        words.contains(&format!(" {} ", normalize_words(&phrase).trim()))
    })
}

/// Lowercase, punctuation to spaces, single spaced, padded with spaces
fn normalize_words(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect();
    let joined = mapped.split_whitespace().collect::<Vec<_>>().join(" ");
    format!(" {joined} ")
}
