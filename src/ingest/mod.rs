// Ingest module
// Turns files or piped text into embedded chunks in the vector index

pub mod chunking;
pub mod discovery;
pub mod pipeline;

pub use chunking::{ChunkError, SourceChunks, chunk_file, chunk_files, chunk_reader, chunk_text};
pub use discovery::{DiscoveryError, MatchPatterns, discover};
pub use pipeline::{EmbeddingPipeline, PipelineError, StatusFn};
