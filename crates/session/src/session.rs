//! Session provider and session interfaces

use crate::error::{BackendError, Result, StatusCode};
use async_trait::async_trait;
use futures::stream::BoxStream;
use proven_value::{NamedParams, Row, ValueType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

/// Opaque backend-issued identifier of an open transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction mode requested from the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxMode {
    SerializableReadWrite,
    SnapshotReadOnly,
    StaleReadOnly,
    OnlineReadOnly { allow_inconsistent_reads: bool },
}

impl TxMode {
    pub fn is_read_only(&self) -> bool {
        !matches!(self, TxMode::SerializableReadWrite)
    }
}

/// Transaction control attached to every data statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxControl {
    /// Start a new transaction for this statement, committing it afterwards if `commit`
    Begin { mode: TxMode, commit: bool },
    /// Run inside an already open transaction
    Continue { tx_id: TransactionId, commit: bool },
}

impl TxControl {
    pub fn commits(&self) -> bool {
        match self {
            TxControl::Begin { commit, .. } | TxControl::Continue { commit, .. } => *commit,
        }
    }
}

/// Result column metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value_type: ValueType,
}

impl Column {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// One result set produced by a statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column metadata
    pub columns: Vec<Column>,
    /// Rows of data (each row is a vector of Values)
    pub rows: Vec<Row>,
}

impl ResultSet {
    /// Check if the result set is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get the number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Get a single value from the first row and column as string
    pub fn single_value(&self) -> Option<String> {
        self.rows
            .first()
            .and_then(|row| row.first())
            .map(|v| v.to_string())
    }

    /// Get values from a specific column as strings
    pub fn column_values(&self, column_name: &str) -> Vec<String> {
        if let Some(col_index) = self.columns.iter().position(|c| c.name == column_name) {
            self.rows
                .iter()
                .filter_map(|row| row.get(col_index))
                .map(|v| v.to_string())
                .collect()
        } else {
            Vec::new()
        }
    }
}

/// Event emitted while a data statement runs
#[derive(Debug, Clone, PartialEq)]
pub enum StatementEvent {
    /// The statement runs in (or opened) this transaction, which is still open
    Transaction(TransactionId),
    /// A complete result set
    ResultSet(ResultSet),
}

/// Output of a data statement. The stream is independent of the session borrow.
pub type EventStream = BoxStream<'static, Result<StatementEvent>>;

/// A backend statement-execution context
#[async_trait]
pub trait Session: Send {
    /// Backend identifier of this session
    fn id(&self) -> &str;

    /// Run a data statement under the given transaction control
    async fn run_data_statement(
        &mut self,
        text: &str,
        tx_control: &TxControl,
        params: &NamedParams,
        timeout: Duration,
    ) -> Result<EventStream>;

    /// Run a schema statement; never transactional
    async fn run_schema_statement(&mut self, text: &str, timeout: Duration) -> Result<()>;

    /// Open a transaction on this session
    async fn begin_tx(&mut self, mode: TxMode, timeout: Duration) -> Result<TransactionId>;

    async fn commit_tx(&mut self, tx_id: &TransactionId, timeout: Duration) -> Result<()>;

    async fn rollback_tx(&mut self, tx_id: &TransactionId, timeout: Duration) -> Result<()>;

    /// Return the session to its pool
    fn release(self: Box<Self>);
}

/// Pooled source of sessions
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Acquire a session, waiting at most `timeout`
    async fn acquire(&self, timeout: Duration) -> Result<Box<dyn Session>>;
}

/// An acquired session that is released exactly once, when the lease is dropped
pub struct SessionLease {
    session: Box<dyn Session>,
}

impl SessionLease {
    pub fn new(session: Box<dyn Session>) -> Self {
        Self { session }
    }

    /// Acquire a session from `provider` and wrap it in a lease
    pub async fn acquire(provider: &dyn SessionProvider, timeout: Duration) -> Result<Self> {
        let session = provider.acquire(timeout).await?;
        tracing::debug!("Acquired session {}", session.id());
        Ok(Self::new(session))
    }

    /// Release the session now
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for SessionLease {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("session", &self.session.id())
            .finish()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let session = std::mem::replace(&mut self.session, Box::new(Released));
        tracing::debug!("Releasing session {}", session.id());
        session.release();
    }
}

/// Placeholder left behind in a lease whose session was handed back
struct Released;

impl Released {
    fn error() -> BackendError {
        BackendError::new(StatusCode::BadSession, "session already released")
    }
}

#[async_trait]
impl Session for Released {
    fn id(&self) -> &str {
        "released"
    }

    async fn run_data_statement(
        &mut self,
        _text: &str,
        _tx_control: &TxControl,
        _params: &NamedParams,
        _timeout: Duration,
    ) -> Result<EventStream> {
        Err(Self::error())
    }

    async fn run_schema_statement(&mut self, _text: &str, _timeout: Duration) -> Result<()> {
        Err(Self::error())
    }

    async fn begin_tx(&mut self, _mode: TxMode, _timeout: Duration) -> Result<TransactionId> {
        Err(Self::error())
    }

    async fn commit_tx(&mut self, _tx_id: &TransactionId, _timeout: Duration) -> Result<()> {
        Err(Self::error())
    }

    async fn rollback_tx(&mut self, _tx_id: &TransactionId, _timeout: Duration) -> Result<()> {
        Err(Self::error())
    }

    fn release(self: Box<Self>) {}
}
