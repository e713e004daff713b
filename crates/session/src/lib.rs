//! Backend sessions for the proven driver
//!
//! A session is a server-side statement-execution context handed out by a
//! pooled [`SessionProvider`]. This crate defines the provider and session
//! interfaces the connection layer talks to, the transaction-control types sent
//! with each statement, and a scripted in-memory [`mock::MockProvider`] used to
//! exercise the connection layer without a server.

pub mod error;
pub mod mock;
pub mod session;

pub use error::{BackendError, Result, StatusCode};
pub use session::{
    Column, EventStream, ResultSet, Session, SessionLease, SessionProvider, StatementEvent,
    TransactionId, TxControl, TxMode,
};
