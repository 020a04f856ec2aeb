//! Error types for store construction and CRUD operations.

use std::io;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for store operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid construction arguments.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Empty or malformed call arguments. Raised before any connection is opened.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// A failure surfaced by SQLite, propagated as-is.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// A failure surfaced by SQLite, wrapped with an operation-specific message.
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The blocking task running the statement panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Argument,
    Store,
}

impl Error {
    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        Error::Argument(msg.into())
    }

    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) | Error::Io(_) => ErrorKind::Configuration,
            Error::Argument(_) => ErrorKind::Argument,
            Error::Sqlite(_) | Error::Store { .. } | Error::Task(_) => ErrorKind::Store,
        }
    }
}

/// Wraps a SQLite failure with the given context.
pub(crate) fn wrap_store(context: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
    move |source| Error::Store { context, source }
}
