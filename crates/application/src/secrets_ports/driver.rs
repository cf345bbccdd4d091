use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pamgate_core::AppResult;
use pamgate_domain::{AccessScope, Asset, QueryLogRecord};

use super::accounts::AdminCredentials;

/// Databases a grant or revocation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    /// Every database on the server.
    AllDatabases,
    /// A named set of databases.
    Named(Vec<String>),
}

impl DatabaseTarget {
    /// Builds a target from a stored database list; an empty list is the
    /// all-databases sentinel.
    #[must_use]
    pub fn from_databases(databases: &[String]) -> Self {
        if databases.is_empty() {
            Self::AllDatabases
        } else {
            Self::Named(databases.to_vec())
        }
    }

    /// Returns whether the target covers every database.
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::AllDatabases)
    }

    /// Returns the named databases, empty for the all-databases case.
    #[must_use]
    pub fn named(&self) -> &[String] {
        match self {
            Self::AllDatabases => &[],
            Self::Named(databases) => databases,
        }
    }
}

/// Per-step result of a best-effort JIT account teardown.
#[derive(Debug, Clone, Default)]
pub struct TerminationOutcome {
    /// Whether the server-side account was dropped.
    pub terminated: bool,
    /// Whether query logs were harvested before the drop.
    pub audit_logs_retrieved: bool,
    /// Whether the broker-side account row was retired.
    pub account_deleted: bool,
    /// Number of harvested statements.
    pub audit_log_count: usize,
    /// Human-readable failures from steps that did not complete.
    pub errors: Vec<String>,
}

/// Engine-specific operations against one connected target server.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Creates a server account with grants matching the scope and target.
    async fn create_user(
        &self,
        username: &str,
        password: &str,
        target: &DatabaseTarget,
        scope: AccessScope,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Kills the account's open connections and drops it.
    async fn terminate_user(&self, username: &str, target: &DatabaseTarget) -> AppResult<()>;

    /// Harvests statements the account ran between the two instants.
    async fn retrieve_user_query_logs(
        &self,
        username: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<QueryLogRecord>>;

    /// Returns whether the engine can express the scope.
    fn supports_scope(&self, scope: AccessScope) -> bool;

    /// Verifies the admin connection is usable.
    async fn test_connection(&self) -> AppResult<()>;
}

/// Port for opening engine-specific driver connections to assets.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Connects to an asset with admin credentials, choosing the engine
    /// driver from the asset's DBMS.
    async fn connect(
        &self,
        asset: &Asset,
        credentials: &AdminCredentials,
        target: &DatabaseTarget,
    ) -> AppResult<Arc<dyn DatabaseDriver>>;
}
