// RAG module
// Retrieval, prompt assembly and streamed answers

pub mod engine;
pub mod prompt;
pub mod reasoning;
pub mod stream;

pub use engine::{Answer, AnswerEvent, AnswerStream, QuerySettings, RagEngine};
pub use prompt::{
    DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_PROMPT_TEMPLATE, MetaDecoder, PromptError,
    build_user_prompt, decode_chunk_meta,
};
pub use reasoning::{Filtered, ReasoningFilter, split_reasoning};
pub use stream::{StreamChunk, stream};
