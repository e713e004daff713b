//! Connection state machine
//!
//! Each operation reads the current state, performs its effect and installs
//! the next state only after that effect succeeded. A failing operation leaves
//! the state, and any session it holds, exactly as it found them.

use crate::config::{ConnectionConfig, IsolationLevel, TxSettings};
use crate::error::{Error, Result, StateError};
use crate::executor::{self, Deadlines};
use crate::state::{ConnectionState, StateCell};
use proven_query::QueryDescriptor;
use proven_session::{ResultSet, SessionLease, SessionProvider, TransactionId, TxControl};
use proven_value::NamedParams;
use std::sync::Arc;
use std::time::Duration;

/// Result of running a data statement with one parameter row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Result sets in the order the backend produced them
    pub result_sets: Vec<ResultSet>,
}

impl QueryResult {
    pub fn new(result_sets: Vec<ResultSet>) -> Self {
        Self { result_sets }
    }

    /// First result set, if any
    pub fn first(&self) -> Option<&ResultSet> {
        self.result_sets.first()
    }

    pub fn is_empty(&self) -> bool {
        self.result_sets.is_empty()
    }
}

/// A single-owner connection to the backend
pub struct Connection {
    provider: Arc<dyn SessionProvider>,
    config: ConnectionConfig,
    state: StateCell,
}

impl Connection {
    /// Create a connection in Outside-Transaction with the configured settings
    pub fn new(provider: Arc<dyn SessionProvider>, config: ConnectionConfig) -> Self {
        let state = StateCell::new(ConnectionState::OutsideTransaction {
            settings: config.tx_settings,
        });
        Self {
            provider,
            config,
            state,
        }
    }

    /// Current state
    pub fn state(&self) -> &ConnectionState {
        self.state.get()
    }

    pub fn is_closed(&self) -> bool {
        self.state.get().is_closed()
    }

    /// Id of the open transaction, if any
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.state.get().transaction_id()
    }

    /// Settings of the current state; `None` once closed
    pub fn tx_settings(&self) -> Option<TxSettings> {
        self.state.get().settings().copied()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn query_timeout(&self) -> Duration {
        self.config.query_timeout
    }

    /// Set the deadline passed with every following statement
    pub fn set_query_timeout(&mut self, timeout: Duration) {
        self.config.query_timeout = timeout;
    }

    fn deadlines(&self) -> Deadlines {
        Deadlines {
            session: self.config.session_timeout,
            query: self.config.query_timeout,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StateError::Closed.into());
        }
        Ok(())
    }

    /// Run a data query once per parameter row, strictly in order.
    ///
    /// An empty `rows` runs the query once without parameters. When a row of a
    /// multi-row batch fails, the error is [`Error::PartialBatch`] and carries
    /// the results of the rows that completed before it.
    pub async fn execute_data_query(
        &mut self,
        descriptor: &QueryDescriptor,
        rows: &[NamedParams],
    ) -> Result<Vec<QueryResult>> {
        self.ensure_open()?;

        let no_params = NamedParams::new();
        let rows: Vec<&NamedParams> = if rows.is_empty() {
            vec![&no_params]
        } else {
            rows.iter().collect()
        };
        let batch = rows.len() > 1;

        let mut completed = Vec::with_capacity(rows.len());
        for (row, params) in rows.into_iter().enumerate() {
            match self.execute_row(descriptor.canonical_text(), params).await {
                Ok(result) => completed.push(result),
                Err(source) if batch => {
                    tracing::debug!("Batch row {} failed: {}", row, source);
                    return Err(Error::PartialBatch {
                        row,
                        completed,
                        source: Box::new(source),
                    });
                }
                Err(source) => return Err(source),
            }
        }
        Ok(completed)
    }

    async fn execute_row(&mut self, text: &str, params: &NamedParams) -> Result<QueryResult> {
        let timeout = self.config.query_timeout;

        if let Some(mut held) = self.state.held_session().await {
            let drained = held.track_stream();
            let control = TxControl::Continue {
                tx_id: held.tx_id.clone(),
                commit: false,
            };
            let output =
                executor::run_on_session(held.session, timeout, text, &control, params, drained)
                    .await?;
            self.settle_held_transaction(output.tx_id);
            return Ok(QueryResult::new(output.result_sets));
        }

        let settings = match self.state.get() {
            ConnectionState::OutsideTransaction { settings } => *settings,
            _ => return Err(StateError::Closed.into()),
        };
        let control = TxControl::Begin {
            mode: settings.tx_mode(),
            commit: settings.auto_commit,
        };

        let (output, lease) =
            executor::run_transient(self.provider.as_ref(), self.deadlines(), text, &control, params)
                .await?;

        match output.tx_id {
            Some(tx_id) => {
                tracing::debug!("Statement opened transaction {} on session {}", tx_id, lease.id());
                self.state.replace(ConnectionState::InsideTransaction {
                    tx_id,
                    session: lease,
                    settings,
                });
            }
            None => lease.release(),
        }
        Ok(QueryResult::new(output.result_sets))
    }

    /// Install the transaction a statement on the held session reported
    fn settle_held_transaction(&mut self, reported: Option<TransactionId>) {
        match reported {
            Some(reported) if self.transaction_id() == Some(&reported) => {}
            Some(reported) => {
                tracing::warn!("Backend switched the held session to transaction {}", reported);
                self.state.transition(|state| match state {
                    ConnectionState::InsideTransaction {
                        session, settings, ..
                    } => (
                        ConnectionState::InsideTransaction {
                            tx_id: reported,
                            session,
                            settings,
                        },
                        (),
                    ),
                    other => (other, ()),
                });
            }
            None => {
                tracing::debug!("Backend ended the held transaction");
                let lease = self.state.transition(ConnectionState::leave_transaction);
                drop(lease);
            }
        }
    }

    /// Run a schema statement on a session acquired for it alone
    pub async fn execute_schema_query(&mut self, text: &str) -> Result<()> {
        match self.state.get() {
            ConnectionState::Closed => return Err(StateError::Closed.into()),
            ConnectionState::InsideTransaction { .. } => {
                return Err(StateError::SchemaQueryInTransaction.into());
            }
            ConnectionState::OutsideTransaction { .. } => {}
        }
        executor::run_schema_transient(self.provider.as_ref(), self.deadlines(), text).await
    }

    /// Open a transaction with `settings`. A no-op if one is already open.
    pub async fn begin_transaction(&mut self, settings: TxSettings) -> Result<()> {
        match self.state.get() {
            ConnectionState::Closed => return Err(StateError::Closed.into()),
            ConnectionState::InsideTransaction { .. } => return Ok(()),
            ConnectionState::OutsideTransaction { .. } => {}
        }

        let mut lease = SessionLease::acquire(self.provider.as_ref(), self.config.session_timeout)
            .await?;
        let tx_id = match lease
            .begin_tx(settings.tx_mode(), self.config.transaction_timeout)
            .await
        {
            Ok(tx_id) => tx_id,
            Err(e) => {
                lease.release();
                return Err(e.into());
            }
        };

        tracing::debug!("Began transaction {} on session {}", tx_id, lease.id());
        self.state.replace(ConnectionState::InsideTransaction {
            tx_id,
            session: lease,
            settings: settings.with_auto_commit(false),
        });
        Ok(())
    }

    /// Commit the open transaction and release its session. A no-op outside one.
    ///
    /// If the backend rejects the commit, the transaction and its session are
    /// kept so the commit can be retried or rolled back.
    pub async fn commit_transaction(&mut self) -> Result<()> {
        self.finish_transaction(true).await
    }

    /// Roll back the open transaction and release its session. A no-op outside one.
    pub async fn rollback_transaction(&mut self) -> Result<()> {
        self.finish_transaction(false).await
    }

    async fn finish_transaction(&mut self, commit: bool) -> Result<()> {
        let timeout = self.config.transaction_timeout;
        let Some(held) = self.state.held_session().await else {
            return Ok(());
        };

        if commit {
            held.session.commit_tx(held.tx_id, timeout).await?;
            tracing::debug!("Committed transaction {}", held.tx_id);
        } else {
            held.session.rollback_tx(held.tx_id, timeout).await?;
            tracing::debug!("Rolled back transaction {}", held.tx_id);
        }

        if let Some(lease) = self.state.transition(ConnectionState::leave_transaction) {
            lease.release();
        }
        Ok(())
    }

    /// Toggle auto-commit. Enabling it inside a transaction commits that
    /// transaction first; disabling it there changes nothing.
    pub async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        match self.state.get() {
            ConnectionState::Closed => Err(StateError::Closed.into()),
            ConnectionState::InsideTransaction { .. } if !auto_commit => Ok(()),
            ConnectionState::InsideTransaction { .. } => {
                self.commit_transaction().await?;
                self.update_settings(|s| s.with_auto_commit(true))
            }
            ConnectionState::OutsideTransaction { .. } => {
                self.update_settings(|s| s.with_auto_commit(auto_commit))
            }
        }
    }

    /// Set the isolation level of transactions opened from now on
    pub fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()> {
        self.update_settings(|s| s.with_isolation_level(level))
    }

    /// Set the read-only flag of transactions opened from now on
    pub fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        self.update_settings(|s| s.with_read_only(read_only))
    }

    fn update_settings(&mut self, f: impl FnOnce(TxSettings) -> TxSettings) -> Result<()> {
        match self.state.get() {
            ConnectionState::OutsideTransaction { settings } => {
                let settings = f(*settings);
                self.state
                    .replace(ConnectionState::OutsideTransaction { settings });
                Ok(())
            }
            ConnectionState::InsideTransaction { .. } => {
                Err(StateError::SettingsChangeInTransaction.into())
            }
            ConnectionState::Closed => Err(StateError::Closed.into()),
        }
    }

    /// Commit any open transaction, release its session and close.
    ///
    /// A failed commit leaves the connection open inside its transaction.
    pub async fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.commit_transaction().await?;
        self.state.replace(ConnectionState::Closed);
        Ok(())
    }

    /// Close no matter what.
    ///
    /// An open transaction is rolled back on a best-effort basis; its session
    /// is released whether or not the rollback succeeds. Closing a closed
    /// connection does nothing.
    pub async fn force_close(&mut self) {
        let timeout = self.config.transaction_timeout;
        if let Some(held) = self.state.held_session().await
            && let Err(e) = held.session.rollback_tx(held.tx_id, timeout).await
        {
            tracing::warn!(
                "Rollback of transaction {} failed during forced close: {}",
                held.tx_id,
                e
            );
        }
        self.state.replace(ConnectionState::Closed);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let (state, pending_drain) = self.state.detach();
        let ConnectionState::InsideTransaction { tx_id, session, .. } = state else {
            return;
        };
        tracing::warn!(
            "Connection dropped inside transaction {}, releasing session {}",
            tx_id,
            session.id()
        );

        // The session goes back only after a stream still draining on it has ended
        if let Some(drained) = pending_drain {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = drained.await;
                        drop(session);
                    });
                }
                Err(_) => {
                    tracing::warn!("No runtime available to wait for a draining stream, releasing session now");
                }
            }
        }
    }
}
