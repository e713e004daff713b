//! Connection core for the proven driver
//!
//! A [`Connection`] holds exactly one [`ConnectionState`] at a time and runs
//! every operation against it:
//! - outside a transaction, each statement borrows a session from the pool
//!   and hands it back unless the statement leaves a transaction open
//! - inside a transaction, the state owns its session until commit, rollback
//!   or a forced close
//! - result streams are wrapped in a [`CancelSafeStream`] so a cancelled
//!   operation drains its stream instead of abandoning the session mid-flight

pub mod config;
pub mod connection;
pub mod error;
mod executor;
pub mod state;
pub mod stream;

pub use config::{ConnectionConfig, IsolationLevel, TxSettings};
pub use connection::{Connection, QueryResult};
pub use error::{Error, ErrorKind, Result, StateError};
pub use state::ConnectionState;
pub use stream::CancelSafeStream;
