
use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::client::{ChatDelta, ChatRequest, Completion, DeltaStream, LlmClient, Usage};
use super::errors::{ApiError, LlmError};

const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 30;
const SSE_DATA_PREFIX: &str = "data:";
const SSE_DONE: &str = "[DONE]";

/// Client for any endpoint speaking the OpenAI `/v1` REST dialect
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: Url,
    display_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    #[serde(flatten)]
    request: &'a ChatRequest,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: MessageBody,
}

#[derive(Debug, Default, Deserialize)]
struct MessageBody {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunkResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: MessageBody,
    finish_reason: Option<String>,
}

impl OpenAiClient {
    /// Build a client for `base_url`, which must be absolute with a host and no query or fragment
    #[inline]
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, LlmError> {
        let parsed = normalize_base_url(base_url)?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECONDS))
            .build()?;

        Ok(Self {
            display_url: parsed.as_str().trim_end_matches('/').to_string(),
            base_url: parsed,
            api_key: api_key.filter(|k| !k.is_empty()),
            http,
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, LlmError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| LlmError::InvalidBaseUrl {
                url: self.display_url.clone(),
                reason: e.to_string(),
            })?;

        let builder = self.http.request(method, url);
        Ok(match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, LlmError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!("{} returned HTTP {}", self.display_url, status.as_u16());
        Err(api_error(status.as_u16(), &body).into())
    }
}

/// Parse and validate a provider base URL, ensuring a trailing slash so relative joins stay under it
#[inline]
pub fn normalize_base_url(raw: &str) -> Result<Url, LlmError> {
    let invalid = |reason: &str| LlmError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("must not contain a query or fragment"));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Extract `error.message` (or a bare `error` string) from an error envelope
fn error_message(body: &str) -> Option<String> {
    let value = serde_json::from_str::<serde_json::Value>(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(serde_json::Value::as_str)
        .or_else(|| error.as_str())
        .map(str::to_string)
}

fn api_error(status: u16, body: &str) -> ApiError {
    let message = error_message(body).unwrap_or_else(|| body.trim().to_string());
    ApiError::new(status, message)
}

#[async_trait]
impl LlmClient for OpenAiClient {
    #[inline]
    fn base_url(&self) -> &str {
        &self.display_url
    }

    #[inline]
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let response = self.send(self.request(Method::GET, "models")?).await?;
        let list: ModelList = serde_json::from_slice(&response.bytes().await?)?;
        debug!("{} lists {} models", self.display_url, list.data.len());
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    #[inline]
    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_batch(model, &[input.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(LlmError::NoEmbeddingReturned)
    }

    #[inline]
    async fn embed_batch(
        &self,
        model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model,
            input: inputs,
        };
        let response = self
            .send(self.request(Method::POST, "embeddings")?.json(&body))
            .await?;
        let mut parsed: EmbeddingResponse = serde_json::from_slice(&response.bytes().await?)?;

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    #[inline]
    async fn chat(&self, request: &ChatRequest) -> Result<Completion, LlmError> {
        let body = ChatBody {
            request,
            stream: false,
        };
        let response = self
            .send(self.request(Method::POST, "chat/completions")?.json(&body))
            .await?;
        let parsed: CompletionResponse = serde_json::from_slice(&response.bytes().await?)?;

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Ok(Completion {
                content: None,
                usage: parsed.usage,
            });
        };

        if let Some(refusal) = choice.message.refusal.filter(|r| !r.is_empty()) {
            return Err(LlmError::ModelRefused(refusal));
        }

        Ok(Completion {
            content: Some(choice.message.content.unwrap_or_default()),
            usage: parsed.usage,
        })
    }

    #[inline]
    async fn chat_stream(&self, request: &ChatRequest) -> Result<DeltaStream, LlmError> {
        let body = ChatBody {
            request,
            stream: true,
        };
        let response = self
            .send(self.request(Method::POST, "chat/completions")?.json(&body))
            .await?;
        let status = response.status().as_u16();
        Ok(sse_deltas(Box::pin(response.bytes_stream()), status))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Incremental line splitter for `text/event-stream` bodies
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.drain(..=pos).collect::<Vec<_>>();
            events.extend(parse_line(&line));
        }
        events
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest).into_iter().collect()
    }
}

fn parse_line(line: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(line);
    let data = line
        .trim_end_matches(['\r', '\n'])
        .strip_prefix(SSE_DATA_PREFIX)?
        .trim_start();

    if data == SSE_DONE {
        Some(SseEvent::Done)
    } else if data.is_empty() {
        None
    } else {
        Some(SseEvent::Data(data.to_string()))
    }
}

fn decode_chunk(data: &str, status: u16) -> Result<ChatDelta, LlmError> {
    match serde_json::from_str::<StreamChunkResponse>(data) {
        Ok(chunk) => {
            let mut delta = ChatDelta {
                usage: chunk.usage,
                ..ChatDelta::default()
            };
            if let Some(choice) = chunk.choices.into_iter().next() {
                delta.content = choice.delta.content.unwrap_or_default();
                delta.refusal = choice.delta.refusal.unwrap_or_default();
                delta.finish_reason = choice.finish_reason;
            }
            Ok(delta)
        }
        Err(e) => match error_message(data) {
            Some(message) => Err(ApiError::new(status, message).into()),
            None => Err(e.into()),
        },
    }
}

struct SseState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<ChatDelta, LlmError>>,
    status: u16,
    finished: bool,
}

impl<S> SseState<S> {
    fn handle(&mut self, events: Vec<SseEvent>) {
        for event in events {
            if self.finished {
                return;
            }
            match event {
                SseEvent::Done => self.finished = true,
                SseEvent::Data(data) => {
                    let delta = decode_chunk(&data, self.status);
                    self.finished = delta.is_err();
                    self.pending.push_back(delta);
                }
            }
        }
    }
}

/// Turn a raw SSE byte stream into chat deltas, ending at `[DONE]` or end of body
fn sse_deltas<S, B, E>(bytes: S, status: u16) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<LlmError> + Send + 'static,
{
    let state = SseState {
        bytes,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        status,
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.handle(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    let events = state.decoder.finish();
                    state.handle(events);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}
