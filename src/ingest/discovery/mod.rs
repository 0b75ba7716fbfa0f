
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use fancy_regex::Regex;
use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid match pattern {pattern:?}: {source}")]
    InvalidMatchPattern {
        pattern: String,
        #[source]
        source: Box<fancy_regex::Error>,
    },
    #[error("{}", .0.iter().join("\n"))]
    Paths(Vec<PathError>),
}

/// A failure tied to one input path or walked entry
#[derive(Debug)]
pub struct PathError {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for PathError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Compiled include filters. An empty set matches every file.
#[derive(Debug, Clone, Default)]
pub struct MatchPatterns {
    patterns: Vec<Regex>,
}

impl MatchPatterns {
    /// Compile every pattern, failing on the first invalid one
    #[inline]
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self, DiscoveryError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| DiscoveryError::InvalidMatchPattern {
                    pattern: p.as_ref().to_string(),
                    source: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// True when any pattern matches the forward-slash form of `path`
    #[inline]
    pub fn matches(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return true;
        }

        let normalized = path.to_string_lossy().replace('\\', "/");
        self.patterns
            .iter()
            .any(|re| match re.is_match(&normalized) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!("Pattern {} failed on {}: {}", re.as_str(), normalized, e);
                    false
                }
            })
    }
}

/// Resolve inputs to a de-duplicated list of absolute regular-file paths.
///
/// Directories are walked recursively. Patterns filter both walked files and
/// files named directly. Per-path failures are collected and reported
/// together after every input has been visited.
#[inline]
pub fn discover<P: AsRef<Path>>(
    inputs: &[P],
    patterns: &MatchPatterns,
) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    let mut errors = Vec::new();

    let mut record = |path: PathBuf| {
        if seen.insert(path.clone()) {
            files.push(path);
        }
    };

    for input in inputs {
        let input = input.as_ref();
        let absolute = match std::path::absolute(input) {
            Ok(path) => path,
            Err(e) => {
                errors.push(PathError {
                    path: input.to_path_buf(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        let metadata = match absolute.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                errors.push(PathError {
                    path: absolute,
                    message: e.to_string(),
                });
                continue;
            }
        };

        if !metadata.is_dir() {
            if patterns.matches(&absolute) {
                record(absolute);
            } else {
                debug!("Skipping {}: no pattern matches", absolute.display());
            }
            continue;
        }

        for entry in WalkDir::new(&absolute).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    errors.push(PathError {
                        path: e
                            .path()
                            .map_or_else(|| absolute.clone(), Path::to_path_buf),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            if patterns.matches(entry.path()) {
                record(entry.into_path());
            }
        }
    }

    debug!("Discovered {} files from {} inputs", files.len(), inputs.len());

    if errors.is_empty() {
        Ok(files)
    } else {
        Err(DiscoveryError::Paths(errors))
    }
}
