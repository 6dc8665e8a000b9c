use std::fs;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path not found: {0}")]
    NotFound(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("cannot open directory: {0}")]
    CannotOpen(PathBuf),

    #[error("decode failure in {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("non-monotonic {level} index {index} (table holds {count})")]
    NonMonotonicIndex {
        level: &'static str,
        index: usize,
        count: usize,
    },
}

impl DirectoryError {
    /// Builds a decode error for the given file.
    pub fn decode(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Canonicalizes a path, returning the original if canonicalization fails.
pub fn canonicalize_existing_path(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}
