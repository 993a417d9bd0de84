//! Ollama streaming chat client

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use super::{ReplyGenerator, TokenIncrement, TokenStream, endpoint};
use crate::config::ServicesConfig;
use crate::reply::Prompt;
use crate::{Error, Result};

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    options: ChatOptions<'a>,
}

#[derive(serde::Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(serde::Serialize)]
struct ChatOptions<'a> {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
    stop: &'a [String],
}

#[derive(serde::Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(serde::Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// One decoded line of the chat stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    /// Generated text carried by the line (may be empty)
    pub text: String,
    /// The model finished the reply
    pub done: bool,
}

/// Splits a byte stream into newline-delimited JSON chat events
///
/// Lines may arrive split across network chunks at any byte, including
/// inside a multi-byte character.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
}

impl NdjsonDecoder {
    /// Feed a network chunk, returning every complete line's event
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<ChatEvent>> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decode a final line that had no trailing newline
    pub fn finish(&mut self) -> Option<Result<ChatEvent>> {
        let line = std::mem::take(&mut self.buf);
        parse_line(&line)
    }
}

fn parse_line(line: &[u8]) -> Option<Result<ChatEvent>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    let chunk: ChatChunk = match serde_json::from_slice(line) {
        Ok(chunk) => chunk,
        Err(e) => return Some(Err(Error::Generation(format!("malformed stream line: {e}")))),
    };

    if let Some(error) = chunk.error {
        return Some(Err(Error::Generation(error)));
    }

    Some(Ok(ChatEvent {
        text: chunk.message.map(|m| m.content).unwrap_or_default(),
        done: chunk.done,
    }))
}

/// Streams replies from an Ollama server
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stop: Vec<String>,
}

impl OllamaGenerator {
    #[must_use]
    pub fn new(services: &ServicesConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: endpoint(&services.llm_url, "/api/chat"),
            model: services.llm_model.clone(),
            temperature: services.temperature,
            top_p: services.top_p,
            max_tokens: services.max_tokens,
            stop: services.stop.clone(),
        }
    }
}

struct StreamState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: NdjsonDecoder,
    pending: VecDeque<String>,
    index: usize,
    finished: bool,
}

impl StreamState {
    fn absorb(&mut self, event: Result<ChatEvent>) -> Result<()> {
        let event = event?;
        if !event.text.is_empty() && !self.finished {
            self.pending.push_back(event.text);
        }
        if event.done {
            self.finished = true;
        }
        Ok(())
    }
}

#[async_trait]
impl ReplyGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<TokenStream> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            stream: true,
            options: ChatOptions {
                temperature: self.temperature,
                top_p: self.top_p,
                num_predict: self.max_tokens,
                stop: &self.stop,
            },
        };

        tracing::debug!(model = %self.model, language = %prompt.language, "starting generation");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                Error::Generation(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Generation(format!("API error {status}: {body}")));
        }

        let state = StreamState {
            bytes: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()))
                .boxed(),
            decoder: NdjsonDecoder::default(),
            pending: VecDeque::new(),
            index: 0,
            finished: false,
        };

        let stream = stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(text) = state.pending.pop_front() {
                    let increment = TokenIncrement {
                        index: state.index,
                        text,
                    };
                    state.index += 1;
                    return Ok(Some((increment, state)));
                }
                if state.finished {
                    return Ok(None);
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        for event in state.decoder.push(&chunk) {
                            state.absorb(event)?;
                        }
                    }
                    Some(Err(e)) => return Err(Error::Generation(e.to_string())),
                    None => {
                        if let Some(event) = state.decoder.finish() {
                            state.absorb(event)?;
                        }
                        // A stream cut off before `done` still ends the reply
                        state.finished = true;
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
