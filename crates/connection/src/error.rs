//! Error types for connection operations

use crate::connection::QueryResult;
use proven_session::BackendError;
use thiserror::Error;

/// Result type for connection operations
pub type Result<T> = std::result::Result<T, Error>;

/// Operation not valid for the current connection state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("schema query inside active transaction")]
    SchemaQueryInTransaction,

    #[error("cannot change isolation/read-only inside active transaction")]
    SettingsChangeInTransaction,

    #[error("connection is closed")]
    Closed,
}

/// Connection error types
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Query(#[from] proven_query::Error),

    #[error("Invalid connection state: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Batch failed at row {row} after {} completed row(s): {source}", .completed.len())]
    PartialBatch {
        row: usize,
        completed: Vec<QueryResult>,
        source: Box<Error>,
    },
}

/// Error classes callers dispatch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or mixed-kind SQL; detected before any network call
    Grammar,
    /// Operation invalid for the current state; state left untouched
    State,
    /// Unknown or missing bound parameter; detected before any network call
    Argument,
    /// The backend rejected a request
    Backend,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Query(e) if e.is_grammar() => ErrorKind::Grammar,
            Error::Query(_) => ErrorKind::Argument,
            Error::State(_) => ErrorKind::State,
            Error::Backend(_) => ErrorKind::Backend,
            Error::PartialBatch { source, .. } => source.kind(),
        }
    }

    /// Backend error behind this error, if any
    pub fn backend(&self) -> Option<&BackendError> {
        match self {
            Error::Backend(e) => Some(e),
            Error::PartialBatch { source, .. } => source.backend(),
            _ => None,
        }
    }
}
