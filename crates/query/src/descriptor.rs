//! Parsed query descriptor

use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level classification of a query text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    /// Data manipulation: runs through the data-statement path, may open a transaction
    Dml,
    /// Schema definition: runs on a transient session, never inside a transaction
    Ddl,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKind::Dml => write!(f, "DML"),
            QueryKind::Ddl => write!(f, "DDL"),
        }
    }
}

/// Classification of a single `;`-separated statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    /// SELECT
    Select,
    /// INSERT, UPDATE, UPSERT, DELETE, REPLACE
    Update,
    /// CREATE, ALTER, DROP
    Scheme,
}

impl StatementKind {
    /// Classify a leading keyword, ignoring case
    pub fn from_keyword(word: &str) -> Option<Self> {
        const SELECT: &[&str] = &["select"];
        const UPDATE: &[&str] = &["insert", "update", "upsert", "delete", "replace"];
        const SCHEME: &[&str] = &["create", "alter", "drop"];

        let matches = |family: &[&str]| family.iter().any(|k| k.eq_ignore_ascii_case(word));

        if matches(SELECT) {
            Some(StatementKind::Select)
        } else if matches(UPDATE) {
            Some(StatementKind::Update)
        } else if matches(SCHEME) {
            Some(StatementKind::Scheme)
        } else {
            None
        }
    }

    /// The query kind this statement family belongs to
    pub fn query_kind(&self) -> QueryKind {
        match self {
            StatementKind::Select | StatementKind::Update => QueryKind::Dml,
            StatementKind::Scheme => QueryKind::Ddl,
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Select => write!(f, "SELECT"),
            StatementKind::Update => write!(f, "UPDATE"),
            StatementKind::Scheme => write!(f, "SCHEME"),
        }
    }
}

/// Result of parsing one query text.
///
/// Every entry of `statements` maps to `kind`; the parser refuses texts that
/// mix DML and DDL statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescriptor {
    raw: String,
    canonical: String,
    kind: QueryKind,
    parameters: Vec<String>,
    statements: Vec<StatementKind>,
}

impl QueryDescriptor {
    pub(crate) fn new(
        raw: String,
        canonical: String,
        kind: QueryKind,
        parameters: Vec<String>,
        statements: Vec<StatementKind>,
    ) -> Self {
        Self {
            raw,
            canonical,
            kind,
            parameters,
            statements,
        }
    }

    /// The text as supplied by the caller
    pub fn raw_text(&self) -> &str {
        &self.raw
    }

    /// The text sent to the backend, with placeholders replaced by parameter names
    pub fn canonical_text(&self) -> &str {
        &self.canonical
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Parameter names in order of first occurrence
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn statements(&self) -> &[StatementKind] {
        &self.statements
    }

    pub fn is_schema(&self) -> bool {
        self.kind == QueryKind::Ddl
    }

    /// Name of the parameter at a 1-based position
    pub fn parameter_name(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.parameters.get(i))
            .map(String::as_str)
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p == name)
    }
}
