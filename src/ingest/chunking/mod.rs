#[cfg(test)]
mod tests;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid chunk size {0}: must be > 0")]
    InvalidChunkSize(usize),
    #[error("invalid chunk overlap {overlap}: must satisfy 0 <= overlap < size ({size})")]
    InvalidChunkOverlap { overlap: usize, size: usize },
    #[error("read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: not valid UTF-8", .path.display())]
    InvalidUtf8 { path: PathBuf },
    #[error("{}: empty file", .path.display())]
    Empty { path: PathBuf },
}

/// All chunks produced from a single input, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChunks {
    /// Path of the file, or a synthetic name for piped input
    pub source: String,
    pub chunks: Vec<String>,
}

/// Split text into windows of `size` code points, each starting `size - overlap`
/// after the previous one. The final window may be shorter. Empty text yields no chunks.
#[inline]
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<String>, ChunkError> {
    if size == 0 {
        return Err(ChunkError::InvalidChunkSize(size));
    }
    if overlap >= size {
        return Err(ChunkError::InvalidChunkOverlap { overlap, size });
    }

    let chars = text.chars().collect::<Vec<_>>();
    let n = chars.len();
    let step = size - overlap;

    let mut chunks = Vec::with_capacity(n.div_ceil(step));
    let mut start = 0;
    while start < n {
        let end = (start + size).min(n);
        chunks.push(chars[start..end].iter().collect::<String>());
        if end == n {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

/// Read and chunk one file. Invalid UTF-8 and empty files are errors; a leading BOM is stripped.
#[inline]
pub fn chunk_file(path: &Path, size: usize, overlap: usize) -> Result<SourceChunks, ChunkError> {
    let bytes = fs::read(path).map_err(|source| ChunkError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let text = decode_text(bytes).ok_or_else(|| ChunkError::InvalidUtf8 {
        path: path.to_path_buf(),
    })?;
    if text.is_empty() {
        return Err(ChunkError::Empty {
            path: path.to_path_buf(),
        });
    }

    let chunks = chunk_text(&text, size, overlap)?;
    debug!("Chunked {} into {} chunks", path.display(), chunks.len());

    Ok(SourceChunks {
        source: path.display().to_string(),
        chunks,
    })
}

/// Chunk every file, skipping (with a warning) those that cannot be chunked.
/// Invalid chunk parameters abort the whole run.
#[inline]
pub fn chunk_files(
    paths: &[PathBuf],
    size: usize,
    overlap: usize,
) -> Result<Vec<SourceChunks>, ChunkError> {
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        match chunk_file(path, size, overlap) {
            Ok(source) => sources.push(source),
            Err(e @ (ChunkError::InvalidChunkSize(_) | ChunkError::InvalidChunkOverlap { .. })) => {
                return Err(e);
            }
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    Ok(sources)
}

/// Chunk everything readable from `reader` under a single source name
#[inline]
pub fn chunk_reader<R: Read>(
    source: &str,
    mut reader: R,
    size: usize,
    overlap: usize,
) -> Result<SourceChunks, ChunkError> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| ChunkError::Read {
            path: PathBuf::from(source),
            source: e,
        })?;

    let text = decode_text(bytes).ok_or_else(|| ChunkError::InvalidUtf8 {
        path: PathBuf::from(source),
    })?;

    Ok(SourceChunks {
        source: source.to_string(),
        chunks: chunk_text(&text, size, overlap)?,
    })
}

fn decode_text(mut bytes: Vec<u8>) -> Option<String> {
    if bytes.starts_with(UTF8_BOM) {
        bytes.drain(..UTF8_BOM.len());
    }
    String::from_utf8(bytes).ok()
}
