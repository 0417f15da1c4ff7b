use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by task loading and dispatch.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task directory, its metadata, or its compiled module is unusable.
    #[error("configuration error: {message}")]
    Configuration { message: String },
    /// The persisted dispatch table is malformed. The file has already been removed.
    #[error("corrupt dispatch table {} (line {line}): {reason}", path.display())]
    CorruptState {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("shape mismatch: {message}")]
    ShapeMismatch { message: String },
    #[error("invalid dispatch entry: candidate {index} is out of range for {num_candidates} candidates")]
    InvalidDispatchEntry { index: usize, num_candidates: usize },
    #[error("execution failure: {message}")]
    Execution { message: String },
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TaskError {
    pub fn configuration(message: impl Into<String>) -> Self {
        TaskError::Configuration {
            message: message.into(),
        }
    }

    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        TaskError::ShapeMismatch {
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        TaskError::Execution {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        TaskError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias for results returned by the runtime.
pub type TaskResult<T> = Result<T, TaskError>;
