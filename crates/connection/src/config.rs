//! Connection configuration

use proven_query::ParseOptions;
use proven_session::TxMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transaction isolation levels understood by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsolationLevel {
    #[default]
    Serializable,
    SnapshotReadOnly,
    StaleReadOnly,
    OnlineConsistentReadOnly,
    OnlineInconsistentReadOnly,
}

/// Settings applied to the transactions a connection opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxSettings {
    pub isolation_level: IsolationLevel,
    pub read_only: bool,
    pub auto_commit: bool,
}

impl Default for TxSettings {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::Serializable,
            read_only: false,
            auto_commit: true,
        }
    }
}

impl TxSettings {
    /// Set isolation level
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Set read-only flag
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set auto-commit flag
    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Backend transaction mode for these settings.
    ///
    /// Serializable plus read-only runs as a snapshot read.
    pub fn tx_mode(&self) -> TxMode {
        match self.isolation_level {
            IsolationLevel::Serializable if self.read_only => TxMode::SnapshotReadOnly,
            IsolationLevel::Serializable => TxMode::SerializableReadWrite,
            IsolationLevel::SnapshotReadOnly => TxMode::SnapshotReadOnly,
            IsolationLevel::StaleReadOnly => TxMode::StaleReadOnly,
            IsolationLevel::OnlineConsistentReadOnly => TxMode::OnlineReadOnly {
                allow_inconsistent_reads: false,
            },
            IsolationLevel::OnlineInconsistentReadOnly => TxMode::OnlineReadOnly {
                allow_inconsistent_reads: true,
            },
        }
    }
}

/// Configuration for a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Deadline for each data or schema statement
    pub query_timeout: Duration,

    /// Deadline for acquiring a session from the provider
    pub session_timeout: Duration,

    /// Deadline for begin, commit and rollback requests
    pub transaction_timeout: Duration,

    /// Initial transaction settings
    pub tx_settings: TxSettings,

    /// Capacity of the descriptor cache; 0 disables it
    pub query_cache_size: usize,

    /// Reject unterminated quotes and comments
    pub strict_parsing: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(60),
            session_timeout: Duration::from_secs(5),
            transaction_timeout: Duration::from_secs(10),
            tx_settings: TxSettings::default(),
            query_cache_size: 256,
            strict_parsing: false,
        }
    }
}

impl ConnectionConfig {
    /// Set statement deadline
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set session acquire deadline
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set transaction control deadline
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Set initial transaction settings
    pub fn with_tx_settings(mut self, settings: TxSettings) -> Self {
        self.tx_settings = settings;
        self
    }

    /// Set descriptor cache capacity
    pub fn with_query_cache_size(mut self, size: usize) -> Self {
        self.query_cache_size = size;
        self
    }

    /// Set strict parsing
    pub fn with_strict_parsing(mut self, strict: bool) -> Self {
        self.strict_parsing = strict;
        self
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            strict: self.strict_parsing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_mode_mapping() {
        let settings = TxSettings::default();
        assert_eq!(settings.tx_mode(), TxMode::SerializableReadWrite);
        assert_eq!(
            settings.with_read_only(true).tx_mode(),
            TxMode::SnapshotReadOnly
        );
        assert_eq!(
            settings
                .with_isolation_level(IsolationLevel::OnlineInconsistentReadOnly)
                .tx_mode(),
            TxMode::OnlineReadOnly {
                allow_inconsistent_reads: true
            }
        );
        assert_eq!(
            settings
                .with_isolation_level(IsolationLevel::StaleReadOnly)
                .tx_mode(),
            TxMode::StaleReadOnly
        );
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"query_cache_size": 0, "tx_settings": {"auto_commit": false}}"#,
        )
        .unwrap();
        assert_eq!(config.query_cache_size, 0);
        assert!(!config.tx_settings.auto_commit);
        assert_eq!(config.tx_settings.isolation_level, IsolationLevel::Serializable);
        assert_eq!(config.query_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_builder() {
        let config = ConnectionConfig::default()
            .with_query_timeout(Duration::from_millis(500))
            .with_strict_parsing(true);
        assert_eq!(config.query_timeout, Duration::from_millis(500));
        assert!(config.parse_options().strict);
    }
}
