//! Reply text: prompts in, sentences out

mod prompt;
mod segmenter;

pub use prompt::{
    Prompt, acknowledgement, apology, farewell, is_exit_request, system_prompt,
};
pub use segmenter::{Sentence, SentenceSegmenter};
