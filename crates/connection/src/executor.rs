//! Statement execution against a session
//!
//! Every result stream is consumed through a [`CancelSafeStream`]. A failing
//! or abandoned stream is drained before the session behind it is given up.

use crate::error::Result;
use crate::state::DrainGuard;
use crate::stream::CancelSafeStream;
use futures::TryStreamExt;
use proven_session::{
    BackendError, EventStream, ResultSet, SessionLease, SessionProvider, StatementEvent,
    StatusCode, TransactionId, TxControl,
};
use proven_value::NamedParams;
use std::time::Duration;

/// Everything a data statement produced
#[derive(Debug, Default)]
pub(crate) struct StatementOutput {
    pub result_sets: Vec<ResultSet>,
    /// Transaction left open by the statement
    pub tx_id: Option<TransactionId>,
}

/// Deadlines applied to one statement
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadlines {
    pub session: Duration,
    pub query: Duration,
}

/// Pull `stream` to its end, collecting events.
///
/// On an upstream error the remainder is drained, the guard dropped and the
/// error returned. On success the guard is handed back.
async fn consume<G: Send + 'static>(
    mut stream: CancelSafeStream<EventStream, G>,
) -> Result<(StatementOutput, Option<G>)> {
    let mut output = StatementOutput::default();
    loop {
        match stream.try_next().await {
            Ok(Some(StatementEvent::Transaction(tx_id))) => {
                if let Some(previous) = output.tx_id.replace(tx_id) {
                    tracing::warn!("Statement reported a second transaction, replacing {}", previous);
                }
            }
            Ok(Some(StatementEvent::ResultSet(result_set))) => {
                output.result_sets.push(result_set);
            }
            Ok(None) => return Ok((output, stream.into_guard())),
            Err(e) => {
                stream.cancel().await;
                return Err(e.into());
            }
        }
    }
}

/// Run a data statement on a session acquired for this statement alone.
///
/// The lease comes back only if the statement succeeded; every failure path
/// releases the session before the error surfaces.
pub(crate) async fn run_transient(
    provider: &dyn SessionProvider,
    deadlines: Deadlines,
    text: &str,
    tx_control: &TxControl,
    params: &NamedParams,
) -> Result<(StatementOutput, SessionLease)> {
    let mut lease = SessionLease::acquire(provider, deadlines.session).await?;

    let events = match lease
        .run_data_statement(text, tx_control, params, deadlines.query)
        .await
    {
        Ok(events) => events,
        Err(e) => {
            lease.release();
            return Err(e.into());
        }
    };

    let (output, lease) = consume(CancelSafeStream::with_guard(events, lease)).await?;
    let lease = lease.ok_or_else(|| {
        BackendError::new(StatusCode::Internal, "result stream lost its session lease")
    })?;
    Ok((output, lease))
}

/// Run a data statement on a session the caller already holds.
///
/// `drained` is dropped only once the result stream has reached its end, in
/// the background if this future is dropped first.
pub(crate) async fn run_on_session(
    session: &mut SessionLease,
    timeout: Duration,
    text: &str,
    tx_control: &TxControl,
    params: &NamedParams,
    drained: DrainGuard,
) -> Result<StatementOutput> {
    let events = session
        .run_data_statement(text, tx_control, params, timeout)
        .await?;
    let (output, _) = consume(CancelSafeStream::with_guard(events, drained)).await?;
    Ok(output)
}

/// Run a schema statement on a session acquired for this statement alone
pub(crate) async fn run_schema_transient(
    provider: &dyn SessionProvider,
    deadlines: Deadlines,
    text: &str,
) -> Result<()> {
    let mut lease = SessionLease::acquire(provider, deadlines.session).await?;
    let result = lease.run_schema_statement(text, deadlines.query).await;
    lease.release();
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proven_session::mock::{MockCall, MockProvider};
    use proven_session::{StatusCode, TxMode};
    use proven_value::{TypedValue, Value, ValueType};

    fn deadlines() -> Deadlines {
        Deadlines {
            session: Duration::from_secs(1),
            query: Duration::from_secs(2),
        }
    }

    fn params() -> NamedParams {
        vec![(
            "$id".to_string(),
            TypedValue::new(Value::I32(1), ValueType::Int32),
        )]
    }

    #[tokio::test]
    async fn test_transient_commit_returns_lease_without_transaction() {
        let provider = MockProvider::new();
        let control = TxControl::Begin {
            mode: TxMode::SerializableReadWrite,
            commit: true,
        };

        let (output, lease) = run_transient(&provider, deadlines(), "SELECT $id", &control, &params())
            .await
            .unwrap();

        assert!(output.tx_id.is_none());
        assert_eq!(output.result_sets.len(), 1);
        assert_eq!(provider.stats().released, 0);
        drop(lease);

        let stats = provider.stats();
        assert_eq!(stats.released, 1);
        assert_eq!(stats.last_timeout(MockCall::Acquire), Some(Duration::from_secs(1)));
        assert_eq!(
            stats.last_timeout(MockCall::DataStatement),
            Some(Duration::from_secs(2))
        );
    }

    #[tokio::test]
    async fn test_transient_stream_failure_drains_and_releases() {
        let provider = MockProvider::new();
        provider.set_result_sets(3);
        provider.fail_next(MockCall::StreamTail, StatusCode::Aborted);
        let control = TxControl::Begin {
            mode: TxMode::SerializableReadWrite,
            commit: true,
        };

        let err = run_transient(&provider, deadlines(), "SELECT $id", &control, &params())
            .await
            .unwrap_err();

        assert_eq!(err.backend().map(|e| e.status), Some(StatusCode::Aborted));
        let stats = provider.stats();
        assert_eq!(stats.streams_completed, 1);
        assert_eq!(stats.released, 1);
    }

    #[tokio::test]
    async fn test_transient_statement_rejection_releases() {
        let provider = MockProvider::new();
        provider.fail_next(MockCall::DataStatement, StatusCode::BadRequest);
        let control = TxControl::Begin {
            mode: TxMode::SerializableReadWrite,
            commit: true,
        };

        assert!(
            run_transient(&provider, deadlines(), "SELECT 1", &control, &Vec::new())
                .await
                .is_err()
        );
        let stats = provider.stats();
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.released, 1);
    }

    #[tokio::test]
    async fn test_schema_rejection_releases() {
        let provider = MockProvider::new();
        provider.fail_next(MockCall::SchemaStatement, StatusCode::PreconditionFailed);

        let err = run_schema_transient(&provider, deadlines(), "DROP TABLE t")
            .await
            .unwrap_err();

        assert_eq!(
            err.backend().map(|e| e.status),
            Some(StatusCode::PreconditionFailed)
        );
        assert_eq!(provider.stats().open_sessions(), 0);
    }
}
