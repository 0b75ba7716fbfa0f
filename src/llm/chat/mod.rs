#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::{ChatMessage, ChatRequest, DeltaStream, LlmClient, Usage};
use super::errors::LlmError;

/// Estimates the token cost of a slice of messages
pub type TokenCounter = Arc<dyn Fn(&[ChatMessage]) -> usize + Send + Sync>;

/// Default counter: one token per four code points, rounded up
#[inline]
pub fn approx_token_count(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|m| m.text().chars().count())
        .sum::<usize>()
        .div_ceil(4)
}

/// Drop the oldest non-system messages until the history fits in `limit` tokens.
///
/// The leading run of system messages is always kept. A user message directly
/// followed by an assistant message is dropped as a pair. A `limit` of zero
/// disables truncation.
#[inline]
pub fn truncate_history(
    counter: &dyn Fn(&[ChatMessage]) -> usize,
    history: &[ChatMessage],
    limit: usize,
) -> Vec<ChatMessage> {
    if history.is_empty() {
        return Vec::new();
    }
    if limit == 0 || counter(history) < limit {
        return history.to_vec();
    }

    let head_len = history.iter().take_while(|m| m.is_system()).count();
    let (head, mut tail) = history.split_at(head_len);
    let head_tokens = counter(head);
    let mut tail_tokens = counter(tail);

    while head_tokens + tail_tokens > limit && !tail.is_empty() {
        let pair = matches!(tail, [ChatMessage::User(_), ChatMessage::Assistant(_), ..]);
        let drop = if pair { 2 } else { 1 };
        tail = &tail[drop..];
        tail_tokens = counter(tail);
    }

    head.iter().chain(tail).cloned().collect()
}

/// Defaults applied to every request a session sends
#[derive(Clone)]
pub struct SessionOptions {
    pub system_prompt: String,
    /// Context window in tokens; zero disables truncation
    pub context_tokens: usize,
    pub temperature: Option<f64>,
    pub token_counter: TokenCounter,
}

impl fmt::Debug for SessionOptions {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("system_prompt", &self.system_prompt)
            .field("context_tokens", &self.context_tokens)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl Default for SessionOptions {
    #[inline]
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            context_tokens: 0,
            temperature: None,
            token_counter: Arc::new(approx_token_count),
        }
    }
}

/// A single prompt to send, with optional per-request overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: Option<f64>,
    pub context_tokens: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

/// Conversation state bound to one client
pub struct ChatSession {
    client: Arc<dyn LlmClient>,
    history: Vec<ChatMessage>,
    options: SessionOptions,
    tokens_used: usize,
}

impl fmt::Debug for ChatSession {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSession")
            .field("client", &self.client.base_url())
            .field("history", &self.history.len())
            .field("tokens_used", &self.tokens_used)
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    #[inline]
    pub fn new(client: Arc<dyn LlmClient>, options: SessionOptions) -> Self {
        let mut session = Self {
            client,
            history: Vec::new(),
            options,
            tokens_used: 0,
        };
        session.reset();
        session
    }

    /// Messages exchanged so far, starting with the system prompt if any
    #[inline]
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Estimated token count of the current history
    #[inline]
    pub fn tokens_used(&self) -> usize {
        self.tokens_used
    }

    #[inline]
    pub fn client(&self) -> &Arc<dyn LlmClient> {
        &self.client
    }

    /// Forget the conversation, keeping only the system prompt
    #[inline]
    pub fn reset(&mut self) {
        self.history.clear();
        if !self.options.system_prompt.is_empty() {
            self.history
                .push(ChatMessage::System(self.options.system_prompt.clone()));
        }
        self.recount();
    }

    /// Send a prompt and wait for the whole answer.
    /// On any failure the history is left as it was before the call.
    #[inline]
    pub async fn send(
        &mut self,
        request: SendRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, LlmError> {
        let outbound = self.begin(request)?;

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(LlmError::Cancelled),
            result = self.client.chat(&outbound) => result,
        };

        match result {
            Ok(completion) => {
                let Some(content) = completion.content else {
                    self.rollback_prompt();
                    return Err(LlmError::EmptyCompletionResponse);
                };
                self.history.push(ChatMessage::Assistant(content.clone()));
                self.recount();
                Ok(ChatResponse {
                    content,
                    usage: completion.usage,
                })
            }
            Err(e) => {
                self.rollback_prompt();
                Err(e)
            }
        }
    }

    /// Send a prompt and stream the answer back.
    ///
    /// The returned stream borrows the session; the assistant message is
    /// recorded only when the stream ends cleanly. Errors, cancellation or
    /// dropping the stream early remove the prompt from the history.
    #[inline]
    pub async fn send_streaming(
        &mut self,
        request: SendRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream<'_>, LlmError> {
        let outbound = self.begin(request)?;

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(LlmError::Cancelled),
            result = self.client.chat_stream(&outbound) => result,
        };

        match opened {
            Ok(inner) => Ok(ChatStream {
                session: self,
                inner,
                cancel,
                answer: String::new(),
                refusal: String::new(),
                usage: None,
                state: StreamState::Open,
            }),
            Err(e) => {
                self.rollback_prompt();
                Err(e)
            }
        }
    }

    fn begin(&mut self, request: SendRequest) -> Result<ChatRequest, LlmError> {
        if request.model.is_empty() {
            return Err(LlmError::NoModelSelected);
        }

        self.history.push(ChatMessage::User(request.prompt));
        self.recount();

        let limit = request.context_tokens.unwrap_or(self.options.context_tokens);
        let messages = truncate_history(self.options.token_counter.as_ref(), &self.history, limit);
        if messages.len() < self.history.len() {
            debug!(
                "Truncated history from {} to {} messages to fit {} tokens",
                self.history.len(),
                messages.len(),
                limit
            );
        }

        Ok(ChatRequest {
            model: request.model,
            messages,
            temperature: request.temperature.or(self.options.temperature),
        })
    }

    /// Remove the most recent user message
    fn rollback_prompt(&mut self) {
        if let Some(pos) = self.history.iter().rposition(ChatMessage::is_user) {
            self.history.remove(pos);
        }
        self.recount();
    }

    fn recount(&mut self) {
        self.tokens_used = (self.options.token_counter)(&self.history);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Finished,
    Failed,
}

/// An in-flight streamed answer
pub struct ChatStream<'a> {
    session: &'a mut ChatSession,
    inner: DeltaStream,
    cancel: CancellationToken,
    answer: String,
    refusal: String,
    usage: Option<Usage>,
    state: StreamState,
}

impl fmt::Debug for ChatStream<'_> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatStream")
            .field("state", &self.state)
            .field("answer", &self.answer)
            .finish_non_exhaustive()
    }
}

impl ChatStream<'_> {
    /// Next non-empty content delta. `None` once the stream has ended or failed.
    #[inline]
    pub async fn next(&mut self) -> Option<Result<String, LlmError>> {
        loop {
            if self.state != StreamState::Open {
                return None;
            }

            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Some(Err(LlmError::Cancelled)),
                item = self.inner.next() => item,
            };

            match item {
                None => {
                    if !self.refusal.is_empty() {
                        let refusal = std::mem::take(&mut self.refusal);
                        return Some(Err(self.fail(LlmError::ModelRefused(refusal))));
                    }
                    self.finish();
                    return None;
                }
                Some(Err(e)) => return Some(Err(self.fail(e))),
                Some(Ok(delta)) => {
                    if delta.usage.is_some() {
                        self.usage = delta.usage;
                    }
                    self.refusal.push_str(&delta.refusal);
                    if delta.finish_reason.is_some() && !self.refusal.is_empty() {
                        let refusal = std::mem::take(&mut self.refusal);
                        return Some(Err(self.fail(LlmError::ModelRefused(refusal))));
                    }
                    if !delta.content.is_empty() {
                        self.answer.push_str(&delta.content);
                        return Some(Ok(delta.content));
                    }
                }
            }
        }
    }

    /// Text accumulated so far
    #[inline]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    #[inline]
    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    fn fail(&mut self, error: LlmError) -> LlmError {
        self.state = StreamState::Failed;
        self.session.rollback_prompt();
        if !matches!(error, LlmError::Cancelled) {
            warn!("Chat stream failed: {}", error);
        }
        error
    }

    fn finish(&mut self) {
        self.state = StreamState::Finished;
        if !self.answer.is_empty() {
            self.session
                .history
                .push(ChatMessage::Assistant(self.answer.clone()));
        }
        self.session.recount();
    }
}

impl Drop for ChatStream<'_> {
    #[inline]
    fn drop(&mut self) {
        if self.state == StreamState::Open {
            debug!("Chat stream dropped before completion; discarding prompt");
            self.session.rollback_prompt();
        }
    }
}
