//! SQL client over a driver connection
//!
//! [`SqlClient`] parses SQL through a shared descriptor cache and dispatches
//! it by kind: schema text goes out as a schema query, everything else as a
//! data query. [`PreparedStatement`] layers `bind`/`add`/`execute` over a
//! parsed descriptor for parameterized and batched execution.

use proven_connection::{Connection, ConnectionConfig, QueryResult};
use proven_query::{self as query, Bindings, Param, QueryCache, QueryDescriptor, QueryKind};
use proven_session::{ResultSet, SessionProvider};
use proven_value::{Value, ValueType};
use std::sync::Arc;

pub use proven_connection::{Error, ErrorKind, Result};

/// SQL client owning one connection
pub struct SqlClient {
    connection: Connection,
    cache: Arc<QueryCache>,
}

impl SqlClient {
    /// Create a client with its own descriptor cache sized from `config`
    pub fn new(provider: Arc<dyn SessionProvider>, config: ConnectionConfig) -> Self {
        let cache = Arc::new(QueryCache::with_capacity(
            config.query_cache_size,
            config.parse_options(),
        ));
        Self::with_cache(provider, config, cache)
    }

    /// Create a client sharing an existing descriptor cache.
    ///
    /// Text is parsed with the options `cache` was built with;
    /// `config.strict_parsing` and `config.query_cache_size` are not applied.
    pub fn with_cache(
        provider: Arc<dyn SessionProvider>,
        config: ConnectionConfig,
        cache: Arc<QueryCache>,
    ) -> Self {
        Self {
            connection: Connection::new(provider, config),
            cache,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Parse `sql` for binding and later execution
    pub fn prepare(&self, sql: &str) -> Result<PreparedStatement> {
        let descriptor = self.cache.parse(sql)?;
        Ok(PreparedStatement::new(descriptor))
    }

    /// Execute SQL without parameters
    pub async fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        let descriptor = self.cache.parse(sql)?;
        let mut results = self.run(&descriptor, &Bindings::new(descriptor.clone())).await?;
        Ok(results.pop().unwrap_or_default())
    }

    /// Execute a query and return its first result set
    pub async fn query(&mut self, sql: &str) -> Result<ResultSet> {
        let result = self.execute(sql).await?;
        Ok(result.result_sets.into_iter().next().unwrap_or_default())
    }

    /// Begin a transaction with the connection's current settings
    pub async fn begin(&mut self) -> Result<()> {
        let settings = self.connection.tx_settings().unwrap_or_default();
        self.connection.begin_transaction(settings).await
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.connection.commit_transaction().await
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.connection.rollback_transaction().await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.connection.close().await
    }

    async fn run(
        &mut self,
        descriptor: &QueryDescriptor,
        bindings: &Bindings,
    ) -> Result<Vec<QueryResult>> {
        match descriptor.kind() {
            QueryKind::Ddl => {
                let parameters = descriptor.parameters();
                if !parameters.is_empty() {
                    return Err(query::Error::SchemaParameters(parameters.to_vec()).into());
                }
                bindings.validate()?;
                self.connection
                    .execute_schema_query(descriptor.canonical_text())
                    .await?;
                Ok(vec![QueryResult::default()])
            }
            QueryKind::Dml => {
                let rows = bindings.prepared_rows()?;
                tracing::debug!(
                    "Executing {} with {} parameter row(s)",
                    descriptor.kind(),
                    rows.len()
                );
                self.connection.execute_data_query(descriptor, &rows).await
            }
        }
    }
}

/// A parsed statement with its parameter rows
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    bindings: Bindings,
}

impl PreparedStatement {
    pub fn new(descriptor: Arc<QueryDescriptor>) -> Self {
        Self {
            bindings: Bindings::new(descriptor),
        }
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        self.bindings.descriptor()
    }

    /// Bind a parameter by name or 1-based position
    pub fn bind<'a>(&mut self, param: impl Into<Param<'a>>, value: impl Into<Value>) -> Result<&mut Self> {
        self.bindings.bind(param, value)?;
        Ok(self)
    }

    pub fn bind_typed<'a>(
        &mut self,
        param: impl Into<Param<'a>>,
        value: impl Into<Value>,
        value_type: ValueType,
    ) -> Result<&mut Self> {
        self.bindings.bind_typed(param, value, value_type)?;
        Ok(self)
    }

    pub fn bind_null<'a>(&mut self, param: impl Into<Param<'a>>, value_type: ValueType) -> Result<&mut Self> {
        self.bindings.bind_null(param, value_type)?;
        Ok(self)
    }

    /// Seal the current row into the batch
    pub fn add(&mut self) -> Result<&mut Self> {
        self.bindings.add()?;
        Ok(self)
    }

    /// Number of rows added to the batch
    pub fn batch_len(&self) -> usize {
        self.bindings.batch_len()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Execute every row on `client`'s connection, one result per row.
    ///
    /// A batch that ran to completion is cleared; after a failure the rows
    /// are kept so the batch can be retried.
    pub async fn execute(&mut self, client: &mut SqlClient) -> Result<Vec<QueryResult>> {
        let descriptor = self.bindings.descriptor().clone();
        let results = client.run(&descriptor, &self.bindings).await?;
        if self.bindings.batch_len() > 0 {
            self.bindings.clear();
        }
        Ok(results)
    }
}
