//! MySQL driver for provisioning and revoking JIT accounts on targets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;
use tracing::debug;

use pamgate_application::{DatabaseDriver, DatabaseTarget};
use pamgate_core::{AppError, AppResult};
use pamgate_domain::{AccessScope, QueryLogRecord};

/// Driver speaking to one MySQL target server over an admin connection.
#[derive(Clone)]
pub struct MySqlTargetDriver {
    pool: MySqlPool,
}

impl MySqlTargetDriver {
    /// Creates a driver over an established admin connection pool.
    #[must_use]
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn drop_user_after_failure(&self, username: &str) {
        for statement in drop_user_statements(username) {
            if let Err(error) = sqlx::query(&statement).execute(&self.pool).await {
                debug!(username, %error, "failed to drop user after grant failure");
            }
        }
    }
}

/// Rejects names that cannot be embedded in DDL statements, which MySQL
/// does not allow binding parameters in.
fn ensure_identifier(name: &str) -> AppResult<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || character == '_')
    {
        return Err(AppError::Validation(format!(
            "'{name}' is not a safe sql identifier"
        )));
    }

    Ok(())
}

fn quote_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "''")
}

/// Compensating teardown for a user whose grants did not fully land.
fn drop_user_statements(username: &str) -> [String; 2] {
    [
        format!("DROP USER IF EXISTS '{username}'@'%'"),
        "FLUSH PRIVILEGES".to_owned(),
    ]
}

/// general_log.user_host holds "user[auth_user] @ host"; anchor the pattern
/// on the exact username followed by '[' so the '_' in generated usernames
/// is not treated as a LIKE wildcard and similar prefixes do not match.
fn user_host_pattern(username: &str) -> String {
    let escaped = username
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{escaped}[%")
}

/// Statement history by user. events_statements_history_long carries no
/// user column; the owning thread supplies it.
const STATEMENT_HISTORY_QUERY: &str = r#"
    SELECT s.SQL_TEXT
    FROM performance_schema.events_statements_history_long s
    JOIN performance_schema.threads t ON t.THREAD_ID = s.THREAD_ID
    WHERE t.PROCESSLIST_USER = ?
      AND s.SQL_TEXT IS NOT NULL
      AND s.SQL_TEXT NOT LIKE 'BEGIN%'
      AND s.SQL_TEXT NOT LIKE 'COMMIT%'
    ORDER BY s.TIMER_START DESC
    LIMIT 1000
"#;

fn privilege_list(scope: AccessScope) -> &'static str {
    match scope {
        AccessScope::ReadOnly => "SELECT",
        AccessScope::ReadWrite | AccessScope::Dml => "SELECT, INSERT, UPDATE, DELETE",
        AccessScope::Ddl => "SELECT, INSERT, UPDATE, DELETE, CREATE, DROP, ALTER, INDEX",
        AccessScope::All => "ALL PRIVILEGES",
    }
}

/// Builds the GRANT statements for an account, one per target database, or
/// a single global grant for the all-databases case.
fn grant_statements(
    username: &str,
    target: &DatabaseTarget,
    scope: AccessScope,
) -> AppResult<Vec<String>> {
    ensure_identifier(username)?;
    let privileges = privilege_list(scope);

    match target {
        DatabaseTarget::AllDatabases => Ok(vec![format!(
            "GRANT {privileges} ON *.* TO '{username}'@'%'"
        )]),
        DatabaseTarget::Named(databases) => databases
            .iter()
            .map(|database| {
                ensure_identifier(database)?;
                Ok(format!(
                    "GRANT {privileges} ON `{database}`.* TO '{username}'@'%'"
                ))
            })
            .collect(),
    }
}

#[async_trait]
impl DatabaseDriver for MySqlTargetDriver {
    async fn create_user(
        &self,
        username: &str,
        password: &str,
        target: &DatabaseTarget,
        scope: AccessScope,
        _expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        ensure_identifier(username)?;
        let mut statements = grant_statements(username, target, scope)?;
        statements.push("FLUSH PRIVILEGES".to_owned());

        // CREATE USER, GRANT and FLUSH commit implicitly in MySQL, so a
        // transaction cannot unwind a partial sequence; a failed grant is
        // compensated by dropping the half-created user.
        let create = format!(
            "CREATE USER '{username}'@'%' IDENTIFIED BY '{}'",
            quote_literal(password)
        );
        sqlx::query(&create)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::DatabaseOperationFailed(format!(
                    "failed to create user '{username}': {error}"
                ))
            })?;

        for statement in statements {
            if let Err(error) = sqlx::query(&statement).execute(&self.pool).await {
                self.drop_user_after_failure(username).await;
                return Err(AppError::DatabaseOperationFailed(format!(
                    "failed to grant privileges to '{username}': {error}"
                )));
            }
        }

        Ok(())
    }

    async fn terminate_user(&self, username: &str, _target: &DatabaseTarget) -> AppResult<()> {
        ensure_identifier(username)?;

        let connection_ids = sqlx::query_scalar::<_, u64>(
            "SELECT id FROM information_schema.processlist WHERE user = ?",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::DatabaseOperationFailed(format!("failed to list connections: {error}"))
        })?;

        for connection_id in connection_ids {
            // The connection may already be gone.
            if let Err(error) = sqlx::query(&format!("KILL {connection_id}"))
                .execute(&self.pool)
                .await
            {
                debug!(connection_id, %error, "failed to kill connection");
            }
        }

        if let Err(error) = sqlx::query(&format!(
            "REVOKE ALL PRIVILEGES, GRANT OPTION FROM '{username}'@'%'"
        ))
        .execute(&self.pool)
        .await
        {
            debug!(username, %error, "revoke failed; user may hold no grants");
        }

        sqlx::query(&format!("DROP USER IF EXISTS '{username}'@'%'"))
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::DatabaseOperationFailed(format!(
                    "failed to drop user '{username}': {error}"
                ))
            })?;

        sqlx::query("FLUSH PRIVILEGES")
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::DatabaseOperationFailed(format!("failed to flush privileges: {error}"))
            })?;

        Ok(())
    }

    async fn retrieve_user_query_logs(
        &self,
        username: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<QueryLogRecord>> {
        ensure_identifier(username)?;
        let mut records = Vec::new();

        let general_log = sqlx::query_scalar::<_, i64>("SELECT @@GLOBAL.general_log")
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                AppError::DatabaseOperationFailed(format!(
                    "failed to read general_log setting: {error}"
                ))
            })?;
        let log_output = sqlx::query_scalar::<_, String>("SELECT @@GLOBAL.log_output")
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                AppError::DatabaseOperationFailed(format!(
                    "failed to read log_output setting: {error}"
                ))
            })?;

        if general_log != 0 && log_output.to_uppercase().contains("TABLE") {
            let rows = sqlx::query_as::<_, (DateTime<Utc>, String)>(
                r#"
                SELECT event_time, CONVERT(argument USING utf8mb4)
                FROM mysql.general_log
                WHERE user_host LIKE ?
                  AND event_time BETWEEN ? AND ?
                  AND command_type = 'Query'
                  AND argument NOT LIKE 'BEGIN%'
                  AND argument NOT LIKE 'COMMIT%'
                  AND argument NOT LIKE 'ROLLBACK%'
                  AND argument NOT LIKE 'USE %'
                ORDER BY event_time DESC
                "#,
            )
            .bind(user_host_pattern(username))
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AppError::DatabaseOperationFailed(format!(
                    "failed to read mysql.general_log: {error}"
                ))
            })?;

            records.extend(rows.into_iter().map(|(executed_at, query_text)| {
                QueryLogRecord {
                    executed_at,
                    query_text,
                }
            }));
        }

        // The statement history carries no wall-clock time; stamp entries
        // with the harvest upper bound.
        match sqlx::query_scalar::<_, String>(STATEMENT_HISTORY_QUERY)
            .bind(username)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => {
                records.extend(rows.into_iter().map(|query_text| QueryLogRecord {
                    executed_at: to,
                    query_text,
                }));
            }
            Err(error) => {
                debug!(%error, "performance_schema statement history not available");
            }
        }

        Ok(records)
    }

    fn supports_scope(&self, _scope: AccessScope) -> bool {
        true
    }

    async fn test_connection(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::DatabaseOperationFailed(format!("connection test failed: {error}"))
            })?;

        Ok(())
    }
}
