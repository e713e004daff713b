//! Connection states
//!
//! A connection is in exactly one of three states. The state that owns a
//! transaction also owns the session the transaction is bound to, so a held
//! session can only exist while a transaction is open.

use crate::config::TxSettings;
use proven_session::{SessionLease, TransactionId};
use std::fmt;
use std::mem;
use tokio::sync::oneshot;

/// Held by a stream running on the held session; dropped once that stream is drained
pub(crate) type DrainGuard = oneshot::Sender<()>;

/// Current state of a connection
pub enum ConnectionState {
    /// No transaction open; statements borrow a session per call
    OutsideTransaction { settings: TxSettings },

    /// A transaction is open on a held session
    InsideTransaction {
        tx_id: TransactionId,
        session: SessionLease,
        settings: TxSettings,
    },

    /// Terminal
    Closed,
}

impl ConnectionState {
    /// Settings of the current state; `None` once closed
    pub fn settings(&self) -> Option<&TxSettings> {
        match self {
            ConnectionState::OutsideTransaction { settings }
            | ConnectionState::InsideTransaction { settings, .. } => Some(settings),
            ConnectionState::Closed => None,
        }
    }

    /// Id of the open transaction, if any
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            ConnectionState::InsideTransaction { tx_id, .. } => Some(tx_id),
            _ => None,
        }
    }

    pub fn is_in_transaction(&self) -> bool {
        matches!(self, ConnectionState::InsideTransaction { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// Outside-Transaction with the same settings, handing back any held session
    pub(crate) fn leave_transaction(self) -> (ConnectionState, Option<SessionLease>) {
        match self {
            ConnectionState::InsideTransaction {
                session, settings, ..
            } => (
                ConnectionState::OutsideTransaction { settings },
                Some(session),
            ),
            other => (other, None),
        }
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::OutsideTransaction { settings } => f
                .debug_struct("OutsideTransaction")
                .field("settings", settings)
                .finish(),
            ConnectionState::InsideTransaction {
                tx_id,
                session,
                settings,
            } => f
                .debug_struct("InsideTransaction")
                .field("tx_id", tx_id)
                .field("session", &session.id())
                .field("settings", settings)
                .finish(),
            ConnectionState::Closed => f.write_str("Closed"),
        }
    }
}

/// The open transaction and its session, borrowed from a [`StateCell`]
pub(crate) struct HeldSession<'a> {
    pub tx_id: &'a TransactionId,
    pub session: &'a mut SessionLease,
    pending_drain: &'a mut Option<oneshot::Receiver<()>>,
}

impl HeldSession<'_> {
    /// Register a stream about to run on the session.
    ///
    /// The session is not handed out again until the returned guard is dropped.
    pub(crate) fn track_stream(&mut self) -> DrainGuard {
        let (guard, drained) = oneshot::channel();
        *self.pending_drain = Some(drained);
        guard
    }
}

/// Single-slot holder of the current state.
///
/// The slot is only ever replaced as a whole; operations read it, do their
/// work and install the next state once that work has succeeded. A stream
/// cancelled on the held session may still be draining in the background;
/// the held session is only handed out once that drain has finished.
pub(crate) struct StateCell {
    current: ConnectionState,
    pending_drain: Option<oneshot::Receiver<()>>,
}

impl StateCell {
    pub(crate) fn new(initial: ConnectionState) -> Self {
        Self {
            current: initial,
            pending_drain: None,
        }
    }

    pub(crate) fn get(&self) -> &ConnectionState {
        &self.current
    }

    /// Install `next`, returning the previous state
    pub(crate) fn replace(&mut self, next: ConnectionState) -> ConnectionState {
        tracing::debug!("Connection state: {:?} -> {:?}", self.current, next);
        mem::replace(&mut self.current, next)
    }

    /// Replace the state with the result of `f` applied to it
    pub(crate) fn transition<R>(
        &mut self,
        f: impl FnOnce(ConnectionState) -> (ConnectionState, R),
    ) -> R {
        let previous = mem::replace(&mut self.current, ConnectionState::Closed);
        let (next, out) = f(previous);
        tracing::debug!("Connection state -> {:?}", next);
        self.current = next;
        out
    }

    /// Wait for a stream cancelled on the held session to finish draining.
    ///
    /// Dropping this future keeps the wait pending for the next caller.
    pub(crate) async fn settle_drain(&mut self) {
        if let Some(drained) = self.pending_drain.as_mut() {
            tracing::debug!("Waiting for a cancelled stream to drain before reusing its session");
            // The sender is only ever dropped, never used
            let _ = drained.await;
            self.pending_drain = None;
        }
    }

    /// Held transaction and its session once no drain is pending on it
    pub(crate) async fn held_session(&mut self) -> Option<HeldSession<'_>> {
        self.settle_drain().await;
        match &mut self.current {
            ConnectionState::InsideTransaction { tx_id, session, .. } => Some(HeldSession {
                tx_id,
                session,
                pending_drain: &mut self.pending_drain,
            }),
            _ => None,
        }
    }

    /// Take the state out of the cell, leaving it Closed, along with any
    /// drain still pending on its session
    pub(crate) fn detach(&mut self) -> (ConnectionState, Option<oneshot::Receiver<()>>) {
        let state = mem::replace(&mut self.current, ConnectionState::Closed);
        (state, self.pending_drain.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proven_session::mock::MockProvider;
    use std::time::Duration;

    #[tokio::test]
    async fn test_leave_transaction_hands_back_session() {
        let provider = MockProvider::new();
        let session = SessionLease::acquire(&provider, Duration::from_secs(1))
            .await
            .unwrap();
        let settings = TxSettings::default().with_auto_commit(false);
        let mut cell = StateCell::new(ConnectionState::InsideTransaction {
            tx_id: TransactionId::new("tx-1"),
            session,
            settings,
        });

        assert_eq!(
            cell.held_session().await.map(|held| held.tx_id.as_str()),
            Some("tx-1")
        );

        let lease = cell.transition(ConnectionState::leave_transaction);
        assert!(matches!(
            cell.get(),
            ConnectionState::OutsideTransaction { settings: s } if *s == settings
        ));
        assert!(cell.held_session().await.is_none());
        assert_eq!(provider.stats().released, 0);

        drop(lease);
        assert_eq!(provider.stats().released, 1);
    }

    #[tokio::test]
    async fn test_held_session_waits_for_pending_drain() {
        let provider = MockProvider::new();
        let session = SessionLease::acquire(&provider, Duration::from_secs(1))
            .await
            .unwrap();
        let mut cell = StateCell::new(ConnectionState::InsideTransaction {
            tx_id: TransactionId::new("tx-1"),
            session,
            settings: TxSettings::default(),
        });

        let guard = cell.held_session().await.unwrap().track_stream();
        let waited = tokio::time::timeout(Duration::from_millis(20), cell.held_session()).await;
        assert!(waited.is_err());

        drop(guard);
        assert!(cell.held_session().await.is_some());

        let (state, pending) = cell.detach();
        assert!(state.is_in_transaction());
        assert!(pending.is_none());
        assert!(cell.get().is_closed());
    }

    #[test]
    fn test_closed_has_no_settings() {
        let mut cell = StateCell::new(ConnectionState::OutsideTransaction {
            settings: TxSettings::default(),
        });
        let previous = cell.replace(ConnectionState::Closed);
        assert!(previous.settings().is_some());
        assert!(cell.get().settings().is_none());
        assert!(cell.get().is_closed());
    }
}
