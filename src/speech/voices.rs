//! Language to voice mapping

use crate::language::Language;

/// Voices used for each output language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceMap {
    /// Preferred Mandarin voice
    pub zh: String,

    /// Mandarin voices tried when the preferred one is missing
    pub zh_alternates: Vec<String>,

    /// Preferred English voice
    pub en: String,

    /// English voices tried when the preferred one is missing
    pub en_alternates: Vec<String>,

    /// Last resort for any language
    pub default: String,
}

impl Default for VoiceMap {
    fn default() -> Self {
        Self {
            zh: "zf_xiaoxiao".to_string(),
            zh_alternates: vec![
                "zf_xiaobei".to_string(),
                "zf_xiaoyi".to_string(),
                "zf_xiaoni".to_string(),
            ],
            en: "af_heart".to_string(),
            en_alternates: Vec::new(),
            default: "af_heart".to_string(),
        }
    }
}

impl VoiceMap {
    /// Voices to try for `language`, in order, without duplicates
    ///
    /// The default voice always comes last.
    #[must_use]
    pub fn chain(&self, language: Language) -> Vec<&str> {
        let (preferred, alternates): (Option<&str>, &[String]) = match language {
            Language::Zh => (Some(self.zh.as_str()), self.zh_alternates.as_slice()),
            Language::En => (Some(self.en.as_str()), self.en_alternates.as_slice()),
            Language::Other => (None, &[]),
        };

        let mut chain: Vec<&str> = Vec::with_capacity(alternates.len() + 2);
        let candidates = preferred
            .into_iter()
            .chain(alternates.iter().map(String::as_str))
            .chain(std::iter::once(self.default.as_str()));

        for voice in candidates {
            if !voice.is_empty() && !chain.contains(&voice) {
                chain.push(voice);
            }
        }
        chain
    }
}
