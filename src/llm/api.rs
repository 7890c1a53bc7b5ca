//! `ApiGenerator`: streaming OpenAI-compatible chat completions.
//!
//! Posts `{model, messages, stream: true, …}` to
//! `<base_url>/chat/completions` and decodes the server-sent-event body:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//! data: {"choices":[{"delta":{"content":"lo"}}]}
//! data: [DONE]
//! ```
//!
//! Lines that are not `data:` lines are ignored; `data:` lines that are not
//! valid JSON are skipped with a warning.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::config::LlmConfig;
use crate::llm::generator::{ChatMessage, FragmentStream, GenerationError, TextGenerator};
use crate::llm::prompt::build_messages;

// ---------------------------------------------------------------------------
// ApiGenerator
// ---------------------------------------------------------------------------

/// Streams replies from DeepSeek, Qwen-Plus or any OpenAI-compatible server.
///
/// All connection details come from [`LlmConfig`].
pub struct ApiGenerator {
    client: reqwest::Client,
    config: LlmConfig,
}

impl ApiGenerator {
    /// The HTTP client gets a connect timeout of `config.timeout_secs`; the
    /// body is streamed without an overall deadline.
    pub fn from_config(config: &LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, prompt: &str, history: &[ChatMessage]) -> serde_json::Value {
        serde_json::json!({
            "model":       self.config.model,
            "messages":    build_messages(prompt, history),
            "stream":      true,
            "temperature": self.config.temperature,
            "max_tokens":  self.config.max_tokens,
        })
    }
}

#[async_trait]
impl TextGenerator for ApiGenerator {
    /// The `Authorization: Bearer …` header is attached only when an API key
    /// is configured.
    async fn generate(
        &self,
        prompt: &str,
        history: &[ChatMessage],
    ) -> Result<FragmentStream, GenerationError> {
        if !self.config.is_configured() {
            return Err(GenerationError::NotConfigured(
                self.config.provider.display_name().to_string(),
            ));
        }

        let mut req = self
            .client
            .post(self.endpoint())
            .json(&self.request_body(prompt, history));
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.bearer_auth(key);
        }

        log::info!(
            "llm: calling {} ({}) with {} history messages",
            self.config.provider.display_name(),
            self.config.model,
            history.len()
        );

        let response = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), req.send())
            .await
            .map_err(|_| GenerationError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(GenerationError::from));
        Ok(sse_fragments(body))
    }
}

// ---------------------------------------------------------------------------
// SSE decoding
// ---------------------------------------------------------------------------

/// Splits a byte stream into complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Feed a chunk; returns every line completed by it, without the
    /// terminator (`\n` or `\r\n`).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Whatever is left after the body ended without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Meaning of one SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    Fragment(String),
    Done,
    Ignore,
}

pub fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Ignore;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    if data.is_empty() {
        return SseLine::Ignore;
    }

    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(json) => match json["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => SseLine::Fragment(content.to_string()),
            _ => SseLine::Ignore,
        },
        Err(e) => {
            log::warn!("llm: skipping malformed stream line ({e}): {data:?}");
            SseLine::Ignore
        }
    }
}

struct SseState {
    body: BoxStream<'static, Result<Vec<u8>, GenerationError>>,
    decoder: LineDecoder,
    ready: VecDeque<String>,
    finished: bool,
}

impl SseState {
    /// Returns `true` once `[DONE]` was seen.
    fn absorb(&mut self, lines: impl IntoIterator<Item = String>) -> bool {
        for line in lines {
            match parse_sse_line(&line) {
                SseLine::Fragment(text) => self.ready.push_back(text),
                SseLine::Done => return true,
                SseLine::Ignore => {}
            }
        }
        false
    }
}

/// Turn an SSE body into a fragment stream.
pub fn sse_fragments<S, B>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, GenerationError>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = SseState {
        body: body.map(|chunk| chunk.map(|b| b.as_ref().to_vec())).boxed(),
        decoder: LineDecoder::default(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(text) = st.ready.pop_front() {
                return Some((Ok(text), st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let lines = st.decoder.push(&chunk);
                    st.finished = st.absorb(lines);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(e), st));
                }
                None => {
                    let tail = st.decoder.finish();
                    st.absorb(tail);
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
