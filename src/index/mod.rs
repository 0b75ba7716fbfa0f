// Vector index module
// In-memory store of (content, meta, embedding) rows with exact KNN search


use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Number of hits returned when a search asks for zero or fewer results
pub const DEFAULT_TOP_K: usize = 5;

/// Path value that selects the purely in-memory store
pub const IN_MEMORY_PATH: &str = ":memory:";

pub type RowId = i64;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid dim: must be > 0")]
    InvalidDim,
    #[error(
        "vector dim mismatch: want {expected}, got {got}{}",
        .row_id.map_or_else(String::new, |id| format!(" (rowid={id})"))
    )]
    DimMismatch {
        expected: usize,
        got: usize,
        row_id: Option<RowId>,
    },
    #[error("vector index is closed")]
    Closed,
    #[error("encode meta: {0}")]
    Meta(#[from] serde_json::Error),
    #[error("index storage {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("index lock poisoned")]
    Poisoned,
}

/// Distance function used for nearest-neighbour ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    L2,
    Cosine,
}

impl Metric {
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Self::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = f64::from(*x) - f64::from(*y);
                    d * d
                })
                .sum::<f64>()
                .sqrt(),
            Self::Cosine => {
                let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
                for (x, y) in a.iter().zip(b) {
                    let (x, y) = (f64::from(*x), f64::from(*y));
                    dot = x.mul_add(y, dot);
                    norm_a = x.mul_add(x, norm_a);
                    norm_b = y.mul_add(y, norm_b);
                }
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                (1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())).max(0.0)
            }
        }
    }
}

/// Where the index keeps its rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// `None` or `":memory:"` keeps everything in memory
    pub path: Option<PathBuf>,
    pub metric: Metric,
}

/// A row to be inserted; the index assigns the row id
#[derive(Debug, Clone, PartialEq)]
pub struct NewRow {
    pub content: String,
    pub meta: serde_json::Value,
    pub vector: Vec<f32>,
}

/// A stored row. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub row_id: RowId,
    pub content: String,
    /// JSON-encoded metadata, stored and returned verbatim
    pub meta: String,
    pub vector: Vec<f32>,
}

/// Result of a nearest-neighbour search; smaller distance is more similar
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub row_id: RowId,
    pub content: String,
    pub meta: String,
    pub distance: f64,
}

#[derive(Debug, Clone)]
struct ContentRow {
    row_id: RowId,
    content: String,
    meta: String,
}

#[derive(Debug, Clone)]
struct VectorRow {
    row_id: RowId,
    embedding: Vec<f32>,
}

/// The two logical relations plus the id allocator.
/// Both relations are kept in ascending row id order.
#[derive(Debug, Default)]
struct Tables {
    chunks: Vec<ContentRow>,
    vectors: Vec<VectorRow>,
    next_row_id: RowId,
    journal: Option<File>,
    closed: bool,
}

/// Exact KNN vector index with a fixed dimension
#[derive(Debug)]
pub struct VectorIndex {
    dim: usize,
    metric: Metric,
    path: Option<PathBuf>,
    tables: RwLock<Tables>,
}

impl VectorIndex {
    /// Create an in-memory index with L2 distance
    #[inline]
    pub fn new(dim: usize) -> Result<Self, IndexError> {
        Self::create(dim, &IndexOptions::default())
    }

    /// Create an index, loading any rows already present in a file-backed store
    #[inline]
    pub fn create(dim: usize, options: &IndexOptions) -> Result<Self, IndexError> {
        if dim == 0 {
            return Err(IndexError::InvalidDim);
        }

        let path = options
            .path
            .as_ref()
            .filter(|p| p.as_os_str() != IN_MEMORY_PATH)
            .cloned();

        let mut tables = Tables {
            next_row_id: 1,
            ..Tables::default()
        };

        if let Some(path) = &path {
            load_journal(path, dim, &mut tables)?;
            tables.journal = Some(open_journal(path)?);
            info!(
                "Opened file-backed vector index at {} with {} rows",
                path.display(),
                tables.chunks.len()
            );
        } else {
            debug!("Created in-memory vector index (dim={})", dim);
        }

        Ok(Self {
            dim,
            metric: options.metric,
            path,
            tables: RwLock::new(tables),
        })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Number of visible rows
    #[inline]
    pub fn len(&self) -> usize {
        self.tables.read().map_or(0, |t| t.chunks.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a batch atomically: either every row becomes visible or none does.
    /// Returns the assigned row ids in input order.
    #[inline]
    pub fn insert(&self, rows: Vec<NewRow>) -> Result<Vec<RowId>, IndexError> {
        let mut tables = self.tables.write().map_err(|_| IndexError::Poisoned)?;
        if tables.closed {
            return Err(IndexError::Closed);
        }

        // Stage both relations before publishing anything
        let mut staged_chunks = Vec::with_capacity(rows.len());
        let mut staged_vectors = Vec::with_capacity(rows.len());
        let mut row_id = tables.next_row_id;

        for row in rows {
            if row.vector.len() != self.dim {
                return Err(IndexError::DimMismatch {
                    expected: self.dim,
                    got: row.vector.len(),
                    row_id: Some(row_id),
                });
            }

            staged_chunks.push(ContentRow {
                row_id,
                content: row.content,
                meta: serde_json::to_string(&row.meta)?,
            });
            staged_vectors.push(VectorRow {
                row_id,
                embedding: row.vector,
            });
            row_id += 1;
        }

        if let Some(journal) = tables.journal.as_mut() {
            let path = self.path.as_deref().unwrap_or_else(|| Path::new(""));
            append_journal(journal, path, &staged_chunks, &staged_vectors)?;
        }

        let ids = staged_chunks.iter().map(|c| c.row_id).collect::<Vec<_>>();
        tables.chunks.extend(staged_chunks);
        tables.vectors.extend(staged_vectors);
        tables.next_row_id = row_id;

        debug!("Inserted {} rows into vector index", ids.len());
        Ok(ids)
    }

    /// Return up to `k` rows ordered by ascending distance, ties broken by row id.
    /// A `k` of zero falls back to [`DEFAULT_TOP_K`].
    #[inline]
    pub fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != self.dim {
            return Err(IndexError::DimMismatch {
                expected: self.dim,
                got: query.len(),
                row_id: None,
            });
        }

        let k = if k == 0 { DEFAULT_TOP_K } else { k };

        let tables = self.tables.read().map_err(|_| IndexError::Poisoned)?;
        if tables.closed {
            return Err(IndexError::Closed);
        }

        let mut scored = tables
            .vectors
            .iter()
            .enumerate()
            .map(|(pos, v)| (self.metric.distance(query, &v.embedding), v.row_id, pos))
            .collect::<Vec<_>>();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        // Rows are appended to both relations together, so positions line up
        let hits = scored
            .into_iter()
            .filter_map(|(distance, row_id, pos)| {
                tables
                    .chunks
                    .get(pos)
                    .filter(|c| c.row_id == row_id)
                    .map(|c| SearchHit {
                        row_id,
                        content: c.content.clone(),
                        meta: c.meta.clone(),
                        distance,
                    })
            })
            .collect();

        Ok(hits)
    }

    /// Fetch a stored row by id
    #[inline]
    pub fn get(&self, row_id: RowId) -> Option<IndexedChunk> {
        let tables = self.tables.read().ok()?;
        let pos = tables
            .chunks
            .binary_search_by_key(&row_id, |c| c.row_id)
            .ok()?;
        let chunk = tables.chunks.get(pos)?;
        let vector = tables.vectors.get(pos)?;
        Some(IndexedChunk {
            row_id,
            content: chunk.content.clone(),
            meta: chunk.meta.clone(),
            vector: vector.embedding.clone(),
        })
    }

    /// Release all rows and storage. Safe to call more than once.
    #[inline]
    pub fn close(&self) -> Result<(), IndexError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.closed {
            return Ok(());
        }

        tables.closed = true;
        tables.chunks = Vec::new();
        tables.vectors = Vec::new();

        if let Some(mut journal) = tables.journal.take() {
            let path = self.path.clone().unwrap_or_default();
            journal
                .flush()
                .and_then(|()| journal.sync_all())
                .map_err(|source| IndexError::Storage { path, source })?;
        }

        debug!("Vector index closed");
        Ok(())
    }
}

fn open_journal(path: &Path) -> Result<File, IndexError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| IndexError::Storage {
            path: path.to_path_buf(),
            source,
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| IndexError::Storage {
            path: path.to_path_buf(),
            source,
        })
}

fn load_journal(path: &Path, dim: usize, tables: &mut Tables) -> Result<(), IndexError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(IndexError::Storage {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| IndexError::Storage {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let row: IndexedChunk = serde_json::from_str(&line)?;
        if row.vector.len() != dim {
            return Err(IndexError::DimMismatch {
                expected: dim,
                got: row.vector.len(),
                row_id: Some(row.row_id),
            });
        }

        tables.next_row_id = tables.next_row_id.max(row.row_id + 1);
        tables.chunks.push(ContentRow {
            row_id: row.row_id,
            content: row.content,
            meta: row.meta,
        });
        tables.vectors.push(VectorRow {
            row_id: row.row_id,
            embedding: row.vector,
        });
    }

    Ok(())
}

fn append_journal(
    journal: &mut File,
    path: &Path,
    chunks: &[ContentRow],
    vectors: &[VectorRow],
) -> Result<(), IndexError> {
    let mut buf = Vec::new();
    for (chunk, vector) in chunks.iter().zip(vectors) {
        let row = IndexedChunk {
            row_id: chunk.row_id,
            content: chunk.content.clone(),
            meta: chunk.meta.clone(),
            vector: vector.embedding.clone(),
        };
        serde_json::to_writer(&mut buf, &row)?;
        buf.push(b'\n');
    }

    journal
        .write_all(&buf)
        .and_then(|()| journal.flush())
        .map_err(|source| IndexError::Storage {
            path: path.to_path_buf(),
            source,
        })
}
