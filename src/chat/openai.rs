//! OpenAI-compatible streaming chat completions
//!
//! Works against any endpoint speaking the `/chat/completions` protocol
//! with `stream: true` (`OpenAI`, Groq, local servers).

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};

use super::{ChatCompletion, DeltaStream, Turn};
use crate::config::{ApiKeys, LlmConfig};
use crate::{Error, Result};

/// Streaming chat client
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
}

impl OpenAiChat {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`)
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(base_url: &str, api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("LLM API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            max_tokens: None,
        })
    }

    /// Create the client described by configuration
    ///
    /// # Errors
    ///
    /// Returns error if no LLM API key is configured
    pub fn from_config(config: &LlmConfig, api_keys: &ApiKeys) -> Result<Self> {
        Ok(Self::new(
            &config.base_url,
            api_keys.llm.clone().unwrap_or_default(),
            config.model.clone(),
        )?
        .with_max_tokens(config.max_tokens))
    }

    /// Cap the completion length
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Model requested from the endpoint
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    async fn stream(&self, turns: &[Turn]) -> Result<DeltaStream> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: turns,
            stream: true,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(model = %self.model, turns = turns.len(), "requesting completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Chat(format!("completion API error {status}: {body}")));
        }

        Ok(sse_deltas(
            response
                .bytes_stream()
                .map_ok(|chunk| chunk.to_vec())
                .map_err(Error::from)
                .boxed(),
        ))
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

/// Incremental decoder for completion server-sent events
///
/// Bytes may arrive split anywhere, including inside a line or a UTF-8
/// sequence; incomplete lines are carried over to the next push.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every complete non-empty delta
    ///
    /// # Errors
    ///
    /// Returns error if a complete event carries malformed JSON
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(bytes);

        let mut deltas = Vec::new();
        while !self.done {
            let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(delta) = self.decode_line(&line)? {
                deltas.push(delta);
            }
        }
        Ok(deltas)
    }

    /// Decode whatever is left once the body ends
    ///
    /// # Errors
    ///
    /// Returns error if the trailing event carries malformed JSON
    pub fn finish(&mut self) -> Result<Option<String>> {
        if self.done || self.buffer.is_empty() {
            return Ok(None);
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line)
    }

    /// Whether the `[DONE]` terminator was seen
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    fn decode_line(&mut self, line: &[u8]) -> Result<Option<String>> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();

        // Comments, event names and blank separators carry no text
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let chunk: ChunkResponse = serde_json::from_str(data)?;
        Ok(chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty()))
    }
}

/// Raw response body chunks
type BodyStream = BoxStream<'static, Result<Vec<u8>>>;

/// Decoder state threaded through the delta stream
struct SseState {
    bytes: BodyStream,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

/// Turn a raw SSE body into a stream of deltas
fn sse_deltas(bytes: BodyStream) -> DeltaStream {
    let state = SseState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.pending.pop_front() {
                return Some((Ok(delta), state));
            }
            if state.finished || state.decoder.is_done() {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => match state.decoder.push(&chunk) {
                    Ok(deltas) => state.pending.extend(deltas),
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                },
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.finished = true;
                    match state.decoder.finish() {
                        Ok(Some(delta)) => state.pending.push_back(delta),
                        Ok(None) => {}
                        Err(e) => return Some((Err(e), state)),
                    }
                }
            }
        }
    })
    .boxed()
}
