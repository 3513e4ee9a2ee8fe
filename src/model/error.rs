use std::fmt;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The backend call an error originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Upload,
    Delete,
    Write,
    Read,
    Sign,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Upload => "upload",
            Operation::Delete => "delete",
            Operation::Write => "write",
            Operation::Read => "read",
            Operation::Sign => "sign",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected or failed the call. `source` is the backend's own error, untouched.
    #[error("failed to {operation} `{key}`: {source}")]
    Backend {
        operation: Operation,
        key: String,
        source: BoxError,
    },

    /// The upload behind a write sink already terminated; its outcome is on the completion.
    #[error("upload stream for `{key}` is closed")]
    StreamClosed { key: String },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// Local I/O outside the backend, such as the CLI's stdin and stdout.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn backend<E>(operation: Operation, key: &str, err: E) -> Self
    where
        E: Into<BoxError>,
    {
        StorageError::Backend {
            operation,
            key: key.to_string(),
            source: err.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        StorageError::Config {
            message: message.into(),
        }
    }

    pub fn operation(&self) -> Option<Operation> {
        match self {
            StorageError::Backend { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}
