
use crate::rag::AnswerEvent;

const HELP: &str = "commands: /models, /model <id>, /clear, /reasoning, /quit";

/// Input to the chat state machine
#[derive(Debug)]
pub enum ChatEvent {
    /// A line typed by the user
    Line(String),
    /// Ctrl-C
    Interrupt,
    /// Input closed
    Eof,
    /// Progress of the in-flight answer
    Stream(AnswerEvent),
    /// The in-flight query could not be started
    QueryFailed { message: String, cancelled: bool },
    /// Document ingestion finished
    RagReady { chunks: usize },
    RagFailed(String),
}

/// Something the terminal should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Ask for the next line
    InputPrompt,
    Status(String),
    Error(String),
    /// Begin an answer from `model`
    AnswerStart(String),
    Answer(String),
    AnswerEnd,
    Models { models: Vec<String>, current: String },
    Clear,
}

/// What the driver must do in response to an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction {
    StartQuery { model: String, query: String },
    Cancel,
    Print(Output),
    PrintReasoning(String),
    /// Drop the conversation history kept for each of these models
    ResetConversation { models: Vec<String> },
    Quit,
}

/// One question and the answer received so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub query: String,
    pub model: String,
    pub answer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Preparing,
    Idle,
    Streaming,
    Done,
}

/// Single-threaded chat session state. Events are handled one at a time and
/// turned into actions; nothing here performs I/O.
#[derive(Debug)]
pub struct ChatState {
    model: String,
    models: Vec<String>,
    show_reasoning: bool,
    phase: Phase,
    transcript: Vec<Turn>,
}

impl ChatState {
    /// `models` are the ids a provider claimed; `model` is the starting chat model
    #[inline]
    pub fn new(model: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            model: model.into(),
            models,
            show_reasoning: false,
            phase: Phase::Preparing,
            transcript: Vec::new(),
        }
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    #[inline]
    pub fn show_reasoning(&self) -> bool {
        self.show_reasoning
    }

    #[inline]
    pub fn is_streaming(&self) -> bool {
        self.phase == Phase::Streaming
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    #[inline]
    pub fn handle(&mut self, event: ChatEvent) -> Vec<ChatAction> {
        if self.phase == Phase::Done {
            return Vec::new();
        }

        match event {
            ChatEvent::Line(line) => self.on_line(line.trim()),
            ChatEvent::Interrupt => {
                if self.is_streaming() {
                    vec![ChatAction::Cancel]
                } else {
                    self.quit()
                }
            }
            ChatEvent::Eof => self.quit(),
            ChatEvent::Stream(event) => self.on_stream(event),
            ChatEvent::QueryFailed { message, cancelled } => {
                if !self.is_streaming() {
                    return Vec::new();
                }
                self.abandon_turn(message, cancelled)
            }
            ChatEvent::RagReady { chunks } => {
                if self.phase != Phase::Preparing {
                    return Vec::new();
                }
                self.phase = Phase::Idle;
                vec![
                    print_status(format!("ready: {chunks} chunks indexed ({HELP})")),
                    ChatAction::Print(Output::InputPrompt),
                ]
            }
            ChatEvent::RagFailed(message) => {
                let mut actions = vec![ChatAction::Print(Output::Error(message))];
                actions.extend(self.quit());
                actions
            }
        }
    }

    fn on_line(&mut self, line: &str) -> Vec<ChatAction> {
        if let Some(command) = line.strip_prefix('/') {
            return self.on_command(command);
        }

        match self.phase {
            Phase::Preparing => vec![print_status("still embedding documents, please wait")],
            Phase::Streaming => vec![print_status(
                "an answer is still streaming; press Ctrl-C to cancel it",
            )],
            Phase::Done => Vec::new(),
            Phase::Idle if line.is_empty() => vec![ChatAction::Print(Output::InputPrompt)],
            Phase::Idle => {
                self.phase = Phase::Streaming;
                self.transcript.push(Turn {
                    query: line.to_string(),
                    model: self.model.clone(),
                    answer: String::new(),
                });
                vec![
                    ChatAction::Print(Output::AnswerStart(self.model.clone())),
                    ChatAction::StartQuery {
                        model: self.model.clone(),
                        query: line.to_string(),
                    },
                ]
            }
        }
    }

    fn on_command(&mut self, command: &str) -> Vec<ChatAction> {
        let (name, arg) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, arg)| (name, arg.trim()));

        let mut actions = match name {
            "quit" | "exit" => return self.quit(),
            "models" => vec![ChatAction::Print(Output::Models {
                models: self.models.clone(),
                current: self.model.clone(),
            })],
            "model" if arg.is_empty() => {
                vec![print_error(format!("usage: /model <id> (current: {})", self.model))]
            }
            "model" if !self.models.iter().any(|m| m == arg) => {
                vec![print_error(format!("model {arg:?} is not served by any provider"))]
            }
            "model" => {
                self.model = arg.to_string();
                vec![print_status(format!("chat model set to {arg}"))]
            }
            "clear" if self.phase == Phase::Streaming => {
                vec![print_status("wait for the answer to finish before /clear")]
            }
            "clear" => {
                let mut models = self
                    .transcript
                    .iter()
                    .map(|turn| turn.model.clone())
                    .collect::<Vec<_>>();
                models.push(self.model.clone());
                self.transcript.clear();
                models.sort();
                models.dedup();
                vec![
                    ChatAction::ResetConversation { models },
                    ChatAction::Print(Output::Clear),
                ]
            }
            "reasoning" => {
                self.show_reasoning = !self.show_reasoning;
                let state = if self.show_reasoning { "shown" } else { "hidden" };
                vec![print_status(format!("reasoning {state}"))]
            }
            _ => vec![print_error(format!("unknown command /{name} ({HELP})"))],
        };

        if self.phase == Phase::Idle {
            actions.push(ChatAction::Print(Output::InputPrompt));
        }
        actions
    }

    fn on_stream(&mut self, event: AnswerEvent) -> Vec<ChatAction> {
        if !self.is_streaming() {
            return Vec::new();
        }

        match event {
            AnswerEvent::Answer(text) => {
                if let Some(turn) = self.transcript.last_mut() {
                    turn.answer.push_str(&text);
                }
                vec![ChatAction::Print(Output::Answer(text))]
            }
            AnswerEvent::Reasoning(text) if self.show_reasoning => {
                vec![ChatAction::PrintReasoning(text)]
            }
            AnswerEvent::ThinkingStarted if !self.show_reasoning => vec![print_status("thinking")],
            AnswerEvent::Reasoning(_)
            | AnswerEvent::ThinkingStarted
            | AnswerEvent::ThinkingEnded => Vec::new(),
            AnswerEvent::Done => {
                self.phase = Phase::Idle;
                vec![
                    ChatAction::Print(Output::AnswerEnd),
                    ChatAction::Print(Output::InputPrompt),
                ]
            }
            AnswerEvent::Failed(error) => {
                let cancelled = matches!(error, crate::llm::LlmError::Cancelled);
                self.abandon_turn(error.to_string(), cancelled)
            }
        }
    }

    /// Drop the unfinished turn after a failure or cancellation
    fn abandon_turn(&mut self, message: String, cancelled: bool) -> Vec<ChatAction> {
        self.phase = Phase::Idle;
        self.transcript.pop();

        let report = if cancelled {
            print_status("cancelled")
        } else {
            print_error(message)
        };
        vec![
            ChatAction::Print(Output::AnswerEnd),
            report,
            ChatAction::Print(Output::InputPrompt),
        ]
    }

    fn quit(&mut self) -> Vec<ChatAction> {
        let mut actions = Vec::new();
        if self.is_streaming() {
            actions.push(ChatAction::Cancel);
        }
        self.phase = Phase::Done;
        actions.push(ChatAction::Quit);
        actions
    }
}

fn print_status(message: impl Into<String>) -> ChatAction {
    ChatAction::Print(Output::Status(message.into()))
}

fn print_error(message: impl Into<String>) -> ChatAction {
    ChatAction::Print(Output::Error(message.into()))
}
