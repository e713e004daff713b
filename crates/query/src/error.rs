//! Error types for query parsing and parameter binding

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Grammar errors
    #[error("SQL grammar error at position {position}: {message}")]
    Grammar { position: usize, message: String },

    // Argument errors
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Parameter index {index} out of range, query declares {count} parameter(s)")]
    ParameterIndexOutOfRange { index: usize, count: usize },

    #[error("Missing value for parameter(s): {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("Parameter {0} is bound to NULL without a type")]
    UntypedNull(String),

    #[error("Schema queries take no parameters, found: {}", .0.join(", "))]
    SchemaParameters(Vec<String>),
}

impl Error {
    pub(crate) fn grammar(position: usize, message: impl Into<String>) -> Self {
        Error::Grammar {
            position,
            message: message.into(),
        }
    }

    /// Malformed or mixed-kind SQL text
    pub fn is_grammar(&self) -> bool {
        matches!(self, Error::Grammar { .. })
    }

    /// Unknown, out-of-range, missing or unsupported bound parameter
    pub fn is_argument(&self) -> bool {
        !self.is_grammar()
    }
}
