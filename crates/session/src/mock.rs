//! Mock session provider
//!
//! A scripted, in-memory backend that follows the session provider API. It
//! keeps counters for every call so tests can check acquire/release balance
//! and transaction traffic, can inject a one-shot failure per call kind, and
//! can hold result streams open behind a gate to exercise cancellation.

use crate::error::{BackendError, Result, StatusCode};
use crate::session::{
    Column, EventStream, ResultSet, Session, SessionProvider, StatementEvent, TransactionId,
    TxControl, TxMode,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use proven_value::NamedParams;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Kinds of calls the mock records and can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    Acquire,
    DataStatement,
    /// Terminal error at the end of the next result stream
    StreamTail,
    SchemaStatement,
    Begin,
    Commit,
    Rollback,
}

/// Counters collected by the mock
#[derive(Debug, Clone, Default)]
pub struct MockStats {
    pub acquired: usize,
    pub released: usize,
    pub data_statements: usize,
    pub schema_statements: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    /// Events pulled from result streams
    pub events_emitted: usize,
    /// Result streams that ran to their terminal signal
    pub streams_completed: usize,
    /// Transaction ids passed to successful `commit_tx` calls, in order
    pub committed: Vec<TransactionId>,
    /// Transaction ids passed to successful `rollback_tx` calls, in order
    pub rolled_back: Vec<TransactionId>,
    /// Deadline passed with every call, in order
    pub timeouts: Vec<(MockCall, Duration)>,
    /// Statement texts, in order
    pub statements: Vec<String>,
    /// Transaction control of every data statement, in order
    pub tx_controls: Vec<TxControl>,
}

impl MockStats {
    /// Sessions acquired and not yet released
    pub fn open_sessions(&self) -> usize {
        self.acquired - self.released
    }

    pub fn last_timeout(&self, call: MockCall) -> Option<Duration> {
        self.timeouts
            .iter()
            .rev()
            .find(|(c, _)| *c == call)
            .map(|(_, t)| *t)
    }
}

#[derive(Default)]
struct MockState {
    stats: MockStats,
    /// Queued failures per call kind, each with the number of calls to let through first
    failures: HashMap<MockCall, VecDeque<(usize, StatusCode)>>,
    next_session: u64,
    result_sets: usize,
}

struct Shared {
    state: Mutex<MockState>,
    /// Open (`true`) lets result streams run; closed holds them after their first event
    gate: watch::Sender<bool>,
}

impl Shared {
    fn record(&self, call: MockCall, timeout: Duration) -> Result<()> {
        self.state.lock().stats.timeouts.push((call, timeout));
        match self.take_failure(call) {
            Some(status) => Err(BackendError::new(
                status,
                format!("injected {:?} failure", call),
            )),
            None => Ok(()),
        }
    }

    fn take_failure(&self, call: MockCall) -> Option<StatusCode> {
        let mut state = self.state.lock();
        let queue = state.failures.get_mut(&call)?;
        let (skip, _) = queue.front_mut()?;
        if *skip > 0 {
            *skip -= 1;
            return None;
        }
        queue.pop_front().map(|(_, status)| status)
    }
}

/// Mock provider handing out [`MockSession`]s
#[derive(Clone)]
pub struct MockProvider {
    shared: Arc<Shared>,
}

impl MockProvider {
    /// Create a new mock provider
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState {
                    result_sets: 1,
                    ..Default::default()
                }),
                gate,
            }),
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> MockStats {
        self.shared.state.lock().stats.clone()
    }

    /// Fail the next call of `call` with `status`. Failures queue up per call kind.
    pub fn fail_next(&self, call: MockCall, status: StatusCode) {
        self.fail_after(call, 0, status);
    }

    /// Let `successes` calls of `call` through, then fail the one after with `status`
    pub fn fail_after(&self, call: MockCall, successes: usize, status: StatusCode) {
        self.shared
            .state
            .lock()
            .failures
            .entry(call)
            .or_default()
            .push_back((successes, status));
    }

    /// Number of result sets every data statement produces
    pub fn set_result_sets(&self, count: usize) {
        self.shared.state.lock().result_sets = count;
    }

    /// Hold result streams after their first event until [`MockProvider::open_gate`]
    pub fn close_gate(&self) {
        self.shared.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.shared.gate.send_replace(true);
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionProvider for MockProvider {
    async fn acquire(&self, timeout: Duration) -> Result<Box<dyn Session>> {
        self.shared.record(MockCall::Acquire, timeout)?;

        let mut state = self.shared.state.lock();
        state.next_session += 1;
        state.stats.acquired += 1;
        let id = format!("session-{}", state.next_session);

        Ok(Box::new(MockSession {
            id,
            shared: self.shared.clone(),
            open_tx: None,
        }))
    }
}

/// Session handed out by [`MockProvider`]
pub struct MockSession {
    id: String,
    shared: Arc<Shared>,
    /// Transaction currently open on this session
    open_tx: Option<TransactionId>,
}

impl MockSession {
    fn new_tx_id() -> TransactionId {
        TransactionId::new(format!("tx-{}", uuid::Uuid::new_v4()))
    }

    fn check_tx(&self, tx_id: &TransactionId) -> Result<()> {
        if self.open_tx.as_ref() == Some(tx_id) {
            Ok(())
        } else {
            Err(BackendError::new(
                StatusCode::NotFound,
                format!("transaction {} not found on {}", tx_id, self.id),
            ))
        }
    }

    /// One result set echoing the bound parameters as a single row
    fn echo(params: &NamedParams) -> ResultSet {
        ResultSet {
            columns: params
                .iter()
                .map(|(name, v)| Column::new(name.trim_start_matches('$'), v.value_type))
                .collect(),
            rows: vec![params.iter().map(|(_, v)| v.value.clone()).collect()],
        }
    }
}

#[async_trait]
impl Session for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_data_statement(
        &mut self,
        text: &str,
        tx_control: &TxControl,
        params: &NamedParams,
        timeout: Duration,
    ) -> Result<EventStream> {
        self.shared.record(MockCall::DataStatement, timeout)?;

        // Transaction still open after this statement, if any
        let open_tx = match tx_control {
            TxControl::Begin { commit: true, .. } => None,
            TxControl::Begin { commit: false, .. } => Some(Self::new_tx_id()),
            TxControl::Continue { tx_id, commit } => {
                self.check_tx(tx_id)?;
                (!commit).then(|| tx_id.clone())
            }
        };
        self.open_tx = open_tx.clone();

        let result_sets = {
            let mut state = self.shared.state.lock();
            state.stats.data_statements += 1;
            state.stats.statements.push(text.to_string());
            state.stats.tx_controls.push(tx_control.clone());
            state.result_sets
        };

        let tail_failure = self.shared.take_failure(MockCall::StreamTail);
        let result = Self::echo(params);
        let shared = self.shared.clone();
        let mut gate = self.shared.gate.subscribe();

        Ok(Box::pin(async_stream::stream! {
            let mut events: Vec<StatementEvent> = Vec::new();
            if let Some(tx_id) = open_tx {
                events.push(StatementEvent::Transaction(tx_id));
            }
            events.extend((0..result_sets).map(|_| StatementEvent::ResultSet(result.clone())));

            for (index, event) in events.into_iter().enumerate() {
                if index > 0 {
                    // A dropped sender means the provider is gone; run to completion
                    let _ = gate.wait_for(|open| *open).await;
                }
                shared.state.lock().stats.events_emitted += 1;
                yield Ok(event);
            }

            if let Some(status) = tail_failure {
                yield Err(BackendError::new(status, "injected stream failure"));
            }

            shared.state.lock().stats.streams_completed += 1;
        }))
    }

    async fn run_schema_statement(&mut self, text: &str, timeout: Duration) -> Result<()> {
        self.shared.record(MockCall::SchemaStatement, timeout)?;
        let mut state = self.shared.state.lock();
        state.stats.schema_statements += 1;
        state.stats.statements.push(text.to_string());
        Ok(())
    }

    async fn begin_tx(&mut self, _mode: TxMode, timeout: Duration) -> Result<TransactionId> {
        self.shared.record(MockCall::Begin, timeout)?;
        let tx_id = Self::new_tx_id();
        self.open_tx = Some(tx_id.clone());
        self.shared.state.lock().stats.begins += 1;
        Ok(tx_id)
    }

    async fn commit_tx(&mut self, tx_id: &TransactionId, timeout: Duration) -> Result<()> {
        self.shared.record(MockCall::Commit, timeout)?;
        self.check_tx(tx_id)?;
        self.open_tx = None;
        let mut state = self.shared.state.lock();
        state.stats.commits += 1;
        state.stats.committed.push(tx_id.clone());
        Ok(())
    }

    async fn rollback_tx(&mut self, tx_id: &TransactionId, timeout: Duration) -> Result<()> {
        self.shared.record(MockCall::Rollback, timeout)?;
        self.check_tx(tx_id)?;
        self.open_tx = None;
        let mut state = self.shared.state.lock();
        state.stats.rollbacks += 1;
        state.stats.rolled_back.push(tx_id.clone());
        Ok(())
    }

    fn release(self: Box<Self>) {
        self.shared.state.lock().stats.released += 1;
    }
}
