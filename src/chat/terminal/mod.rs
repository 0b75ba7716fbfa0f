#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::future::Future;
use std::io::{self, BufRead, Write};

use console::style;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{ChatAction, ChatEvent, ChatState, Output};
use crate::llm::LlmError;
use crate::rag::{AnswerEvent, AnswerStream, RagEngine};
use crate::{RagError, Result};

/// Writes chat output: answers to `out`, everything else to `err`
#[derive(Debug)]
pub struct Renderer<O, E> {
    out: O,
    err: E,
}

impl Renderer<io::Stdout, io::Stderr> {
    #[inline]
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> Renderer<O, E> {
    #[inline]
    pub fn new(out: O, err: E) -> Self {
        Self { out, err }
    }

    #[inline]
    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }

    #[inline]
    pub fn print(&mut self, output: &Output) -> io::Result<()> {
        match output {
            Output::InputPrompt => write!(self.out, "{} ", style("you:").bold().green())?,
            Output::Status(message) => writeln!(self.err, "{}", style(message).dim())?,
            Output::Error(message) => {
                writeln!(self.err, "{} {}", style("error:").bold().red(), message)?;
            }
            Output::AnswerStart(model) => {
                write!(self.out, "{} ", style(format!("llm({model}):")).bold().cyan())?;
            }
            Output::Answer(text) => write!(self.out, "{text}")?,
            Output::AnswerEnd => writeln!(self.out)?,
            Output::Models { models, current } => {
                for model in models {
                    if model == current {
                        writeln!(self.out, "* {}", style(model).bold())?;
                    } else {
                        writeln!(self.out, "  {model}")?;
                    }
                }
            }
            Output::Clear => write!(self.out, "\x1b[2J\x1b[H")?,
        }
        self.out.flush()?;
        self.err.flush()
    }

    #[inline]
    pub fn print_reasoning(&mut self, text: &str) -> io::Result<()> {
        write!(self.out, "{}", style(text).dim().italic())?;
        self.out.flush()
    }
}

struct ActiveAnswer {
    stream: AnswerStream,
    cancel: CancellationToken,
}

/// Drive an interactive chat on the terminal.
///
/// `ingest` embeds the documents; lines are accepted once it has finished.
/// Ctrl-C cancels the answer in flight, or quits when idle.
#[inline]
pub async fn run_chat<F>(
    engine: RagEngine,
    mut state: ChatState,
    ingest: F,
    cancel: &CancellationToken,
) -> Result<()>
where
    F: Future<Output = Result<usize>> + Send,
{
    let mut renderer = Renderer::stdio();
    let mut lines = spawn_line_reader();
    let mut ingest = std::pin::pin!(ingest);
    let mut ingesting = true;
    let mut active: Option<ActiveAnswer> = None;

    loop {
        let event = tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => ChatEvent::Interrupt,
            () = cancel.cancelled() => ChatEvent::Eof,
            result = &mut ingest, if ingesting => {
                ingesting = false;
                match result {
                    Ok(chunks) => ChatEvent::RagReady { chunks },
                    Err(e) => ChatEvent::RagFailed(format!("{e:#}")),
                }
            }
            event = next_answer_event(active.as_mut()) => ChatEvent::Stream(event),
            line = lines.recv() => line.map_or(ChatEvent::Eof, ChatEvent::Line),
        };

        let mut queue: VecDeque<ChatAction> = state.handle(event).into();
        while let Some(action) = queue.pop_front() {
            match action {
                ChatAction::StartQuery { model, query } => {
                    let token = cancel.child_token();
                    match start_query(&engine, &query, &model, &token).await {
                        Ok(stream) => active = Some(ActiveAnswer { stream, cancel: token }),
                        Err(e) => queue.extend(state.handle(ChatEvent::QueryFailed {
                            cancelled: e.is_cancelled(),
                            message: format!("{e:#}"),
                        })),
                    }
                }
                ChatAction::Cancel => {
                    if let Some(answer) = &active {
                        debug!("Cancelling answer in flight");
                        answer.cancel.cancel();
                    }
                }
                ChatAction::Print(output) => renderer.print(&output)?,
                ChatAction::PrintReasoning(text) => renderer.print_reasoning(&text)?,
                ChatAction::ResetConversation { models } => {
                    for model in &models {
                        if let Err(e) = engine.reset_conversation(model).await {
                            warn!("Failed to reset conversation for {}: {}", model, e);
                        }
                    }
                }
                ChatAction::Quit => {
                    info!("Leaving chat");
                    return Ok(());
                }
            }
        }

        if !state.is_streaming() {
            active = None;
        }
    }
}

/// Open the answer stream, giving up if Ctrl-C arrives first
async fn start_query(
    engine: &RagEngine,
    query: &str,
    model: &str,
    cancel: &CancellationToken,
) -> Result<AnswerStream> {
    tokio::select! {
        result = engine.query(query, model, cancel) => result,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            Err(RagError::Llm(LlmError::Cancelled))
        }
    }
}

async fn next_answer_event(active: Option<&mut ActiveAnswer>) -> AnswerEvent {
    match active {
        // A stream that closes without a final event was torn down
        Some(answer) => answer
            .stream
            .next()
            .await
            .unwrap_or_else(|| AnswerEvent::Failed(LlmError::Cancelled)),
        None => std::future::pending().await,
    }
}

/// Read stdin lines on a plain thread so a blocked read never holds up shutdown
fn spawn_line_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
