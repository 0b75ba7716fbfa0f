
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::llm::{ChatSession, LlmError, SendRequest};

/// Items delivered by [`stream`]
#[derive(Debug)]
pub enum StreamChunk {
    Content(String),
    /// The answer completed normally
    End,
    Error(LlmError),
}

/// Run a streamed chat request on a background task.
///
/// The channel holds a single item so the producer never runs ahead of the
/// consumer. Exactly one `End` or `Error` is sent last and the channel then
/// closes. Dropping the receiver stops the producer and discards the prompt
/// from the session history.
#[inline]
pub fn stream(
    session: Arc<Mutex<ChatSession>>,
    request: SendRequest,
    cancel: CancellationToken,
) -> mpsc::Receiver<StreamChunk> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut session = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = tx.send(StreamChunk::Error(LlmError::Cancelled)).await;
                return;
            }
            guard = session.lock() => guard,
        };

        let mut responses = match session.send_streaming(request, cancel).await {
            Ok(responses) => responses,
            Err(e) => {
                let _ = tx.send(StreamChunk::Error(e)).await;
                return;
            }
        };

        loop {
            let item = tokio::select! {
                biased;
                () = tx.closed() => {
                    debug!("Stream consumer went away");
                    return;
                }
                item = responses.next() => item,
            };
            let Some(item) = item else {
                break;
            };

            match item {
                Ok(delta) => {
                    if tx.send(StreamChunk::Content(delta)).await.is_err() {
                        debug!("Stream consumer went away");
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(StreamChunk::Error(e)).await;
                    return;
                }
            }
        }

        let _ = tx.send(StreamChunk::End).await;
    });

    rx
}
