//! Chat model client.
//!
//! [`ChatModel`] is the seam between the orchestrator and the language
//! model. [`OpenAiChat`] talks to `POST {base_url}/chat/completions`:
//! non-streaming calls go through the retrying JSON path, streaming calls
//! parse server-sent `data:` lines until `[DONE]`.

use std::collections::VecDeque;

use async_trait::async_trait;
use docchat_core::prompt::{ChatMessage, ModelRequest};
use docchat_core::{RagError, Result};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;
use crate::http::classify_send_error;
use crate::openai::OpenAiClient;

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce the full answer for an assembled request.
    async fn complete(&self, request: &ModelRequest) -> Result<String>;

    /// Produce the answer as a stream of text deltas.
    async fn stream(&self, request: &ModelRequest) -> Result<BoxStream<'static, Result<String>>>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiChat {
    client: OpenAiClient,
    model: String,
    temperature: Option<f32>,
}

impl OpenAiChat {
    pub fn new(client: OpenAiClient, model: impl Into<String>, temperature: Option<f32>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature,
        }
    }

    pub fn from_config(config: &OpenAiConfig) -> Result<Self> {
        Ok(Self::new(
            OpenAiClient::from_config(config)?,
            config.model.clone(),
            config.temperature,
        ))
    }

    fn body<'a>(&'a self, request: &'a ModelRequest, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: self.temperature,
            stream,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String> {
        let response: ChatResponse = self
            .client
            .post_json("chat/completions", &self.body(request, false))
            .await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| RagError::upstream(None, "chat response contained no choices"))
    }

    async fn stream(&self, request: &ModelRequest) -> Result<BoxStream<'static, Result<String>>> {
        let response = self
            .client
            .send_checked("chat/completions", &self.body(request, true))
            .await?;

        let state = SseState {
            bytes: response.bytes_stream().boxed(),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.pending.pop_front() {
                    return Some((item, st));
                }
                if st.finished {
                    return None;
                }
                match st.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let events = st.decoder.push(&chunk);
                        st.enqueue(events);
                    }
                    Some(Err(e)) => {
                        st.finished = true;
                        st.pending.push_back(Err(classify_send_error(e)));
                    }
                    None => {
                        let events = st.decoder.finish();
                        st.enqueue(events);
                        st.finished = true;
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

struct SseState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl<S> SseState<S> {
    /// Queue decoded events; nothing after `[DONE]` is kept.
    fn enqueue(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::Delta(text) => self.pending.push_back(Ok(text)),
                SseEvent::Malformed(msg) => self.pending.push_back(Err(RagError::upstream(None, msg))),
                SseEvent::Done => {
                    self.finished = true;
                    break;
                }
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Malformed(String),
    Done,
}

/// Incremental decoder for the `data:` lines of a chat completion stream.
///
/// Bytes may split lines (and UTF-8 sequences) arbitrarily; only complete
/// lines are decoded.
#[derive(Default)]
struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            events.extend(decode_line(&String::from_utf8_lossy(&line)));
        }

        events
    }

    /// Decode whatever is left once the body ends; the last line may lack
    /// its newline.
    fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buf);
        decode_line(&String::from_utf8_lossy(&rest)).into_iter().collect()
    }
}

fn decode_line(line: &str) -> Option<SseEvent> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let text: String = chunk
                .choices
                .into_iter()
                .filter_map(|c| c.delta.content)
                .collect();
            (!text.is_empty()).then_some(SseEvent::Delta(text))
        }
        Err(e) => Some(SseEvent::Malformed(format!("malformed stream chunk: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_lines() {
        let mut d = SseDecoder::default();
        let first = d.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel");
        assert!(first.is_empty());
        let second = d.push(b"lo\"}}]}\n\ndata: [DONE]\n");
        assert_eq!(
            second,
            vec![SseEvent::Delta("Hello".into()), SseEvent::Done]
        );
    }

    #[test]
    fn decoder_skips_role_only_chunks_and_comments() {
        let mut d = SseDecoder::default();
        let events = d.push(
            b": keep-alive\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\
              data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n",
        );
        assert_eq!(events, vec![SseEvent::Delta(" world".into())]);
    }

    #[test]
    fn decoder_flushes_unterminated_last_line() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}").is_empty());
        assert_eq!(d.finish(), vec![SseEvent::Delta("tail".into())]);
        assert!(d.finish().is_empty());
    }

    #[test]
    fn decoder_reports_garbage() {
        let mut d = SseDecoder::default();
        let events = d.push(b"data: not json\n");
        assert!(matches!(events[0], SseEvent::Malformed(_)));
    }

    #[test]
    fn request_omits_defaults() {
        let messages = vec![ChatMessage::new(docchat_core::Role::User, "hi")];
        let body = ChatRequest {
            model: "m",
            messages: &messages,
            temperature: None,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]})
        );
    }
}
