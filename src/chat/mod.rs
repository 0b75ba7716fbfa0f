// Interactive chat
// An event-driven state machine and the terminal loop that drives it

pub mod state;
pub mod terminal;

pub use state::{ChatAction, ChatEvent, ChatState, Output, Turn};
pub use terminal::{Renderer, run_chat};
