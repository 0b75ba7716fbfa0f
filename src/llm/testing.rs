// Scripted in-process client used by unit tests across the crate

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::client::{ChatDelta, ChatRequest, Completion, DeltaStream, LlmClient};
use super::errors::{ApiError, LlmError};

pub type BatchPredicate = Box<dyn Fn(&[String]) -> bool + Send + Sync>;

/// What the next chat call should do
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Deltas(Vec<ChatDelta>),
    /// Stream the deltas, then fail with an API error
    DeltasThenFail(Vec<ChatDelta>, u16),
    Status(u16),
    NoChoices,
    /// Emit the deltas, then never finish
    Hang(Vec<ChatDelta>),
}

impl Reply {
    pub fn streamed(parts: &[&str]) -> Self {
        Self::Deltas(parts.iter().map(|p| ChatDelta::content(*p)).collect())
    }
}

pub struct ScriptedClient {
    pub base_url: String,
    pub models: Vec<String>,
    pub dim: usize,
    pub vectors: HashMap<String, Vec<f32>>,
    pub replies: Mutex<VecDeque<Reply>>,
    pub requests: Mutex<Vec<ChatRequest>>,
    pub embed_batches: Mutex<Vec<Vec<String>>>,
    pub short_batch: Option<BatchPredicate>,
    pub failing_batch: Option<BatchPredicate>,
    pub embed_delay: Duration,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub closed: AtomicUsize,
}

impl std::fmt::Debug for ScriptedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedClient")
            .field("base_url", &self.base_url)
            .field("models", &self.models)
            .finish_non_exhaustive()
    }
}

impl ScriptedClient {
    pub fn new(models: &[&str]) -> Self {
        Self {
            base_url: "http://scripted.test/v1".to_string(),
            models: models.iter().map(|m| (*m).to_string()).collect(),
            dim: 3,
            vectors: HashMap::new(),
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            embed_batches: Mutex::new(Vec::new()),
            short_batch: None,
            failing_batch: None,
            embed_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn reply(self, reply: Reply) -> Self {
        self.replies.lock().expect("lock").push_back(reply);
        self
    }

    pub fn push_reply(&self, reply: Reply) {
        self.replies.lock().expect("lock").push_back(reply);
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("lock").clone()
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        self.vectors.get(text).cloned().unwrap_or_else(|| {
            let mut v = vec![0.0; self.dim];
            v[0] = text.chars().count() as f32;
            v
        })
    }

    fn next_reply(&self, request: &ChatRequest) -> Reply {
        self.requests.lock().expect("lock").push(request.clone());
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Reply::Text("ok".to_string()))
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(self.models.clone())
    }

    async fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, LlmError> {
        Ok(self.vector_for(input))
    }

    async fn embed_batch(&self, _model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.embed_batches.lock().expect("lock").push(inputs.to_vec());

        if !self.embed_delay.is_zero() {
            tokio::time::sleep(self.embed_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_batch.as_ref().is_some_and(|f| f(inputs)) {
            return Err(ApiError::new(500, "embedding backend failed").into());
        }

        let mut vectors = inputs.iter().map(|i| self.vector_for(i)).collect::<Vec<_>>();
        if self.short_batch.as_ref().is_some_and(|f| f(inputs)) {
            vectors.pop();
        }
        Ok(vectors)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Completion, LlmError> {
        match self.next_reply(request) {
            Reply::Text(text) => Ok(Completion {
                content: Some(text),
                usage: None,
            }),
            Reply::Deltas(deltas) | Reply::Hang(deltas) | Reply::DeltasThenFail(deltas, _) => {
                Ok(Completion {
                    content: Some(deltas.into_iter().map(|d| d.content).collect()),
                    usage: None,
                })
            }
            Reply::Status(status) => Err(ApiError::new(status, "scripted failure").into()),
            Reply::NoChoices => Ok(Completion::default()),
        }
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<DeltaStream, LlmError> {
        match self.next_reply(request) {
            Reply::Text(text) => Ok(futures::stream::iter(vec![Ok(ChatDelta::content(text))]).boxed()),
            Reply::Deltas(deltas) => Ok(futures::stream::iter(deltas.into_iter().map(Ok)).boxed()),
            Reply::DeltasThenFail(deltas, status) => {
                let items = deltas
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(ApiError::new(status, "stream broke").into())));
                Ok(futures::stream::iter(items).boxed())
            }
            Reply::Hang(deltas) => Ok(futures::stream::iter(deltas.into_iter().map(Ok))
                .chain(futures::stream::pending())
                .boxed()),
            Reply::Status(status) => Err(ApiError::new(status, "scripted failure").into()),
            Reply::NoChoices => Ok(futures::stream::empty().boxed()),
        }
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
