//! Connection state transitions driven against the mock session provider

use proven_connection::{
    Connection, ConnectionConfig, ConnectionState, Error, ErrorKind, IsolationLevel, StateError,
    TxSettings,
};
use proven_query::parse;
use proven_session::mock::{MockCall, MockProvider};
use proven_session::{StatusCode, TxControl};
use proven_value::{NamedParams, TypedValue, Value, ValueType};
use std::sync::Arc;
use std::time::Duration;

fn connect(provider: &MockProvider, settings: TxSettings) -> Connection {
    Connection::new(
        Arc::new(provider.clone()),
        ConnectionConfig::default().with_tx_settings(settings),
    )
}

fn row(id: i64) -> NamedParams {
    vec![(
        "$jp1".to_string(),
        TypedValue::new(Value::I64(id), ValueType::Int64),
    )]
}

fn manual_commit() -> TxSettings {
    TxSettings::default().with_auto_commit(false)
}

#[tokio::test]
async fn test_statement_opening_transaction_keeps_session() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, manual_commit());
    let query = parse("SELECT * FROM users WHERE id = ?").unwrap();

    let results = conn.execute_data_query(&query, &[row(1)]).await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(conn.state().is_in_transaction());
    assert!(conn.transaction_id().is_some());
    let stats = provider.stats();
    assert_eq!(stats.acquired, 1);
    assert_eq!(stats.released, 0);
    assert!(matches!(
        stats.tx_controls[0],
        TxControl::Begin { commit: false, .. }
    ));
}

#[tokio::test]
async fn test_auto_commit_statement_releases_session_once() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, TxSettings::default());
    let query = parse("SELECT * FROM users WHERE id = ?").unwrap();

    let results = conn.execute_data_query(&query, &[row(7)]).await.unwrap();

    assert_eq!(
        results[0].first().unwrap().rows,
        vec![vec![Value::I64(7)]]
    );
    assert!(matches!(
        conn.state(),
        ConnectionState::OutsideTransaction { .. }
    ));
    let stats = provider.stats();
    assert_eq!(stats.acquired, 1);
    assert_eq!(stats.released, 1);
}

#[tokio::test]
async fn test_statements_continue_the_open_transaction() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, manual_commit());
    let query = parse("UPDATE users SET name = 'x' WHERE id = ?").unwrap();

    conn.execute_data_query(&query, &[row(1)]).await.unwrap();
    let tx_id = conn.transaction_id().cloned().unwrap();
    conn.execute_data_query(&query, &[row(2)]).await.unwrap();

    assert_eq!(conn.transaction_id(), Some(&tx_id));
    let stats = provider.stats();
    assert_eq!(stats.acquired, 1);
    assert_eq!(
        stats.tx_controls[1],
        TxControl::Continue {
            tx_id,
            commit: false
        }
    );
}

#[tokio::test]
async fn test_schema_query_inside_transaction_is_rejected() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, TxSettings::default());
    conn.begin_transaction(TxSettings::default()).await.unwrap();
    let tx_id = conn.transaction_id().cloned();

    let err = conn
        .execute_schema_query("CREATE TABLE t (id Int32)")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::State(StateError::SchemaQueryInTransaction)
    ));
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(
        err.to_string(),
        "Invalid connection state: schema query inside active transaction"
    );
    assert_eq!(conn.transaction_id().cloned(), tx_id);
    let stats = provider.stats();
    assert_eq!(stats.released, 0);
    assert_eq!(stats.schema_statements, 0);
}

#[tokio::test]
async fn test_schema_query_uses_a_transient_session() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, TxSettings::default());

    conn.execute_schema_query("CREATE TABLE t (id Int32)")
        .await
        .unwrap();

    let stats = provider.stats();
    assert_eq!(stats.schema_statements, 1);
    assert_eq!(stats.open_sessions(), 0);
    assert_eq!(stats.statements, vec!["CREATE TABLE t (id Int32)".to_string()]);
}

#[tokio::test]
async fn test_commit_commits_held_transaction_then_releases() {
    let provider = MockProvider::new();
    let settings = TxSettings::default().with_isolation_level(IsolationLevel::StaleReadOnly);
    let mut conn = connect(&provider, settings);
    conn.begin_transaction(manual_commit()).await.unwrap();
    let tx_id = conn.transaction_id().cloned().unwrap();

    conn.commit_transaction().await.unwrap();

    let stats = provider.stats();
    assert_eq!(stats.committed, vec![tx_id]);
    assert_eq!(stats.released, 1);
    assert!(matches!(
        conn.state(),
        ConnectionState::OutsideTransaction { settings } if *settings == manual_commit()
    ));
}

#[tokio::test]
async fn test_commit_failure_keeps_transaction_and_session() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, TxSettings::default());
    conn.begin_transaction(TxSettings::default()).await.unwrap();
    let tx_id = conn.transaction_id().cloned();
    provider.fail_next(MockCall::Commit, StatusCode::Aborted);

    let err = conn.commit_transaction().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Backend);
    assert!(err.backend().unwrap().is_retryable());
    assert_eq!(conn.transaction_id().cloned(), tx_id);
    assert_eq!(provider.stats().released, 0);

    // The kept transaction can still be rolled back
    conn.rollback_transaction().await.unwrap();
    let stats = provider.stats();
    assert_eq!(stats.rolled_back.len(), 1);
    assert_eq!(stats.released, 1);
    assert!(!conn.state().is_in_transaction());
}

#[tokio::test]
async fn test_commit_and_rollback_outside_transaction_do_nothing() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, TxSettings::default());

    conn.commit_transaction().await.unwrap();
    conn.rollback_transaction().await.unwrap();

    let stats = provider.stats();
    assert_eq!(stats.acquired, 0);
    assert_eq!(stats.commits + stats.rollbacks, 0);
}

#[tokio::test]
async fn test_begin_inside_transaction_is_a_no_op() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, TxSettings::default());
    conn.begin_transaction(TxSettings::default()).await.unwrap();
    let tx_id = conn.transaction_id().cloned();

    conn.begin_transaction(TxSettings::default()).await.unwrap();

    assert_eq!(conn.transaction_id().cloned(), tx_id);
    assert_eq!(provider.stats().begins, 1);
}

#[tokio::test]
async fn test_close_commits_then_releases_then_closes() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, TxSettings::default());
    conn.begin_transaction(TxSettings::default()).await.unwrap();

    conn.close().await.unwrap();

    let stats = provider.stats();
    assert_eq!(stats.commits, 1);
    assert_eq!(stats.released, 1);
    assert!(conn.is_closed());

    let err = conn.close().await.unwrap_err();
    assert!(matches!(err, Error::State(StateError::Closed)));
}

#[tokio::test]
async fn test_close_with_failing_commit_stays_open() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, TxSettings::default());
    conn.begin_transaction(TxSettings::default()).await.unwrap();
    provider.fail_next(MockCall::Commit, StatusCode::Unavailable);

    assert!(conn.close().await.is_err());
    assert!(conn.state().is_in_transaction());
    assert_eq!(provider.stats().released, 0);
}

#[tokio::test]
async fn test_force_close_releases_even_if_rollback_fails() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, TxSettings::default());
    conn.begin_transaction(TxSettings::default()).await.unwrap();
    provider.fail_next(MockCall::Rollback, StatusCode::Unavailable);

    conn.force_close().await;

    assert!(conn.is_closed());
    let stats = provider.stats();
    assert_eq!(stats.rollbacks, 0);
    assert_eq!(stats.released, 1);

    // Closing again does nothing
    conn.force_close().await;
    assert_eq!(provider.stats().released, 1);
}

#[tokio::test]
async fn test_closed_connection_rejects_operations() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, TxSettings::default());
    conn.close().await.unwrap();
    let query = parse("SELECT 1").unwrap();

    let errors = vec![
        conn.execute_data_query(&query, &[]).await.unwrap_err(),
        conn.execute_schema_query("DROP TABLE t").await.unwrap_err(),
        conn.begin_transaction(TxSettings::default())
            .await
            .unwrap_err(),
        conn.set_auto_commit(false).await.unwrap_err(),
        conn.set_read_only(true).unwrap_err(),
    ];
    for err in errors {
        assert!(matches!(err, Error::State(StateError::Closed)), "{err}");
    }

    conn.commit_transaction().await.unwrap();
    assert_eq!(provider.stats().acquired, 0);
}

#[tokio::test]
async fn test_enabling_auto_commit_commits_open_transaction() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, manual_commit());
    let query = parse("SELECT ?").unwrap();
    conn.execute_data_query(&query, &[row(1)]).await.unwrap();

    conn.set_auto_commit(false).await.unwrap();
    assert!(conn.state().is_in_transaction());

    conn.set_auto_commit(true).await.unwrap();

    assert_eq!(provider.stats().commits, 1);
    assert!(matches!(
        conn.state(),
        ConnectionState::OutsideTransaction { settings } if settings.auto_commit
    ));
}

#[tokio::test]
async fn test_settings_cannot_change_inside_transaction() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, TxSettings::default());

    conn.set_isolation_level(IsolationLevel::SnapshotReadOnly)
        .unwrap();
    conn.set_read_only(true).unwrap();
    let settings = conn.tx_settings().unwrap();
    assert_eq!(settings.isolation_level, IsolationLevel::SnapshotReadOnly);
    assert!(settings.read_only);

    conn.begin_transaction(settings).await.unwrap();
    let err = conn.set_read_only(false).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid connection state: cannot change isolation/read-only inside active transaction"
    );
    let err = conn
        .set_isolation_level(IsolationLevel::Serializable)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::State(StateError::SettingsChangeInTransaction)
    ));
    assert!(conn.tx_settings().unwrap().read_only);
}

#[tokio::test]
async fn test_batch_partial_failure_reports_completed_rows() {
    let provider = MockProvider::new();
    provider.fail_after(MockCall::DataStatement, 2, StatusCode::BadRequest);
    let mut conn = connect(&provider, TxSettings::default());
    let query = parse("UPSERT INTO users (id) VALUES (?)").unwrap();

    let err = conn
        .execute_data_query(&query, &[row(1), row(2), row(3)])
        .await
        .unwrap_err();

    let Error::PartialBatch {
        row,
        completed,
        source,
    } = &err
    else {
        panic!("expected partial batch failure, got {err:?}");
    };
    assert_eq!(*row, 2);
    assert_eq!(completed.len(), 2);
    assert_eq!(source.kind(), ErrorKind::Backend);
    assert_eq!(err.kind(), ErrorKind::Backend);

    let stats = provider.stats();
    assert_eq!(stats.acquired, 3);
    assert_eq!(stats.released, 3);
}

#[tokio::test]
async fn test_single_row_failure_is_not_wrapped() {
    let provider = MockProvider::new();
    provider.fail_next(MockCall::Acquire, StatusCode::Overloaded);
    let mut conn = connect(&provider, TxSettings::default());
    let query = parse("SELECT ?").unwrap();

    let err = conn.execute_data_query(&query, &[row(1)]).await.unwrap_err();

    assert!(matches!(err, Error::Backend(_)));
    assert_eq!(err.backend().unwrap().status, StatusCode::Overloaded);
}

#[tokio::test]
async fn test_failure_inside_transaction_keeps_session() {
    let provider = MockProvider::new();
    let mut conn = connect(&provider, manual_commit());
    let query = parse("SELECT ?").unwrap();
    conn.execute_data_query(&query, &[row(1)]).await.unwrap();
    provider.fail_next(MockCall::DataStatement, StatusCode::PreconditionFailed);

    assert!(conn.execute_data_query(&query, &[row(2)]).await.is_err());

    assert!(conn.state().is_in_transaction());
    assert_eq!(provider.stats().released, 0);
}

#[tokio::test]
async fn test_configured_deadlines_reach_the_provider() {
    let provider = MockProvider::new();
    let config = ConnectionConfig::default()
        .with_session_timeout(Duration::from_millis(250))
        .with_transaction_timeout(Duration::from_millis(750));
    let mut conn = Connection::new(Arc::new(provider.clone()), config);
    conn.set_query_timeout(Duration::from_millis(500));
    let query = parse("SELECT 1").unwrap();

    conn.execute_data_query(&query, &[]).await.unwrap();
    conn.begin_transaction(TxSettings::default()).await.unwrap();
    conn.commit_transaction().await.unwrap();

    let stats = provider.stats();
    assert_eq!(
        stats.last_timeout(MockCall::Acquire),
        Some(Duration::from_millis(250))
    );
    assert_eq!(
        stats.last_timeout(MockCall::DataStatement),
        Some(Duration::from_millis(500))
    );
    assert_eq!(
        stats.last_timeout(MockCall::Commit),
        Some(Duration::from_millis(750))
    );
}
