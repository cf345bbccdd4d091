//! PostgreSQL driver for provisioning and revoking JIT accounts on targets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection, PgConnection, PgPool};
use tracing::debug;

use pamgate_application::{DatabaseDriver, DatabaseTarget};
use pamgate_core::{AppError, AppResult};
use pamgate_domain::{AccessScope, QueryLogRecord};

/// Driver speaking to one PostgreSQL target server over an admin connection.
///
/// Schema and table privileges only exist inside the database a statement
/// runs in, so named-target grants open a dedicated connection per database
/// from the retained connect options. Cluster-wide work (role creation,
/// backend termination, harvesting) runs on the pool.
#[derive(Clone)]
pub struct PostgresTargetDriver {
    pool: PgPool,
    options: PgConnectOptions,
}

impl PostgresTargetDriver {
    /// Creates a driver over an established admin connection pool, keeping
    /// the connect options for per-database connections.
    #[must_use]
    pub fn new(pool: PgPool, options: PgConnectOptions) -> Self {
        Self { pool, options }
    }

    async fn database_connection(&self, database: &str) -> AppResult<PgConnection> {
        self.options
            .clone()
            .database(database)
            .connect()
            .await
            .map_err(|error| {
                AppError::DatabaseOperationFailed(format!(
                    "failed to connect to database '{database}': {error}"
                ))
            })
    }

    async fn grant_named(
        &self,
        username: &str,
        databases: &[String],
        scope: AccessScope,
    ) -> AppResult<()> {
        for (database, statements) in named_grant_statements(username, databases, scope)? {
            let mut connection = self.database_connection(&database).await?;
            for statement in &statements {
                sqlx::query(statement)
                    .execute(&mut connection)
                    .await
                    .map_err(|error| {
                        AppError::DatabaseOperationFailed(format!(
                            "failed to grant privileges on '{database}' to '{username}': {error}"
                        ))
                    })?;
            }
            close_connection(connection).await;
        }

        Ok(())
    }

    async fn grant_cluster(&self, username: &str, scope: AccessScope) -> AppResult<()> {
        for statement in cluster_grant_statements(username, scope)? {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|error| {
                    AppError::DatabaseOperationFailed(format!(
                        "failed to grant privileges to '{username}': {error}"
                    ))
                })?;
        }

        Ok(())
    }

    async fn revoke_named(&self, username: &str, databases: &[String]) -> AppResult<()> {
        for database in databases {
            ensure_identifier(database)?;
            let mut connection = match self.database_connection(database).await {
                Ok(connection) => connection,
                Err(error) => {
                    debug!(username, database, %error, "skipping revokes; database unreachable");
                    continue;
                }
            };

            for statement in database_revoke_statements(username, database) {
                // Individual revokes may fail when the grant never landed.
                if let Err(error) = sqlx::query(&statement).execute(&mut connection).await {
                    debug!(username, database, %error, "revoke failed");
                }
            }
            close_connection(connection).await;
        }

        Ok(())
    }

    async fn revoke_cluster(&self, username: &str) {
        let statements = [
            format!("REVOKE pg_read_all_data FROM \"{username}\""),
            format!("REVOKE pg_write_all_data FROM \"{username}\""),
            format!("ALTER USER \"{username}\" WITH NOSUPERUSER"),
            format!("DROP OWNED BY \"{username}\""),
        ];
        for statement in statements {
            if let Err(error) = sqlx::query(&statement).execute(&self.pool).await {
                debug!(username, %error, "cluster revoke failed");
            }
        }
    }
}

async fn close_connection(connection: PgConnection) {
    if let Err(error) = connection.close().await {
        debug!(%error, "failed to close per-database connection");
    }
}

/// Rejects names that cannot be embedded in DDL statements, which
/// PostgreSQL does not allow binding parameters in.
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
    value.replace('\'', "''")
}

fn schema_privileges(scope: AccessScope) -> &'static str {
    match scope {
        AccessScope::ReadOnly => "SELECT",
        AccessScope::ReadWrite | AccessScope::Dml => "SELECT, INSERT, UPDATE, DELETE",
        AccessScope::Ddl | AccessScope::All => "ALL PRIVILEGES",
    }
}

/// Statement set granting one database to an account: connection, schema
/// usage, table and sequence privileges, with default privileges so tables
/// created during the session stay visible. Everything except the CONNECT
/// grant must run over a connection to that database.
fn database_grant_statements(
    username: &str,
    database: &str,
    scope: AccessScope,
) -> AppResult<Vec<String>> {
    ensure_identifier(username)?;
    ensure_identifier(database)?;
    let privileges = schema_privileges(scope);

    let mut statements = vec![
        format!("GRANT CONNECT ON DATABASE \"{database}\" TO \"{username}\""),
        format!("GRANT USAGE ON SCHEMA public TO \"{username}\""),
    ];
    if matches!(scope, AccessScope::Ddl | AccessScope::All) {
        statements.push(format!("GRANT CREATE ON SCHEMA public TO \"{username}\""));
    }
    statements.push(format!(
        "GRANT {privileges} ON ALL TABLES IN SCHEMA public TO \"{username}\""
    ));
    statements.push(format!(
        "GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA public TO \"{username}\""
    ));
    statements.push(format!(
        "ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT {privileges} ON TABLES TO \"{username}\""
    ));

    Ok(statements)
}

/// Per-database grant plan for a set of named databases. Every database
/// receives the same statement set.
fn named_grant_statements(
    username: &str,
    databases: &[String],
    scope: AccessScope,
) -> AppResult<Vec<(String, Vec<String>)>> {
    databases
        .iter()
        .map(|database| {
            Ok((
                database.clone(),
                database_grant_statements(username, database, scope)?,
            ))
        })
        .collect()
}

/// Grants for the all-databases case. PostgreSQL has no cross-database GRANT,
/// so cluster-wide read and write go through the predefined roles, and the
/// widest scope escalates to superuser.
fn cluster_grant_statements(username: &str, scope: AccessScope) -> AppResult<Vec<String>> {
    ensure_identifier(username)?;

    let statements = match scope {
        AccessScope::ReadOnly => {
            vec![format!("GRANT pg_read_all_data TO \"{username}\"")]
        }
        AccessScope::ReadWrite | AccessScope::Dml | AccessScope::Ddl => vec![
            format!("GRANT pg_read_all_data TO \"{username}\""),
            format!("GRANT pg_write_all_data TO \"{username}\""),
        ],
        AccessScope::All => vec![format!("ALTER USER \"{username}\" WITH SUPERUSER")],
    };

    Ok(statements)
}

/// Teardown statement set for one database, mirroring the grant set. DROP
/// OWNED is database-local, so it runs here rather than cluster-wide.
fn database_revoke_statements(username: &str, database: &str) -> Vec<String> {
    vec![
        format!("REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA public FROM \"{username}\""),
        format!("REVOKE ALL PRIVILEGES ON ALL SEQUENCES IN SCHEMA public FROM \"{username}\""),
        format!("REVOKE ALL PRIVILEGES ON SCHEMA public FROM \"{username}\""),
        format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA public REVOKE ALL ON TABLES FROM \"{username}\""
        ),
        format!("DROP OWNED BY \"{username}\""),
        format!("REVOKE CONNECT ON DATABASE \"{database}\" FROM \"{username}\""),
    ]
}

#[async_trait]
impl DatabaseDriver for PostgresTargetDriver {
    async fn create_user(
        &self,
        username: &str,
        password: &str,
        target: &DatabaseTarget,
        scope: AccessScope,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        ensure_identifier(username)?;

        let create = format!(
            "CREATE USER \"{username}\" WITH PASSWORD '{}' VALID UNTIL '{}'",
            quote_literal(password),
            expires_at.to_rfc3339()
        );
        sqlx::query(&create)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::DatabaseOperationFailed(format!(
                    "failed to create user '{username}': {error}"
                ))
            })?;

        let granted = match target {
            DatabaseTarget::AllDatabases => self.grant_cluster(username, scope).await,
            DatabaseTarget::Named(databases) => self.grant_named(username, databases, scope).await,
        };

        if let Err(error) = granted {
            // Leave no orphan role behind when a grant fails.
            if let Err(cleanup_error) = self.terminate_user(username, target).await {
                debug!(username, %cleanup_error, "failed to drop user after grant failure");
            }
            return Err(error);
        }

        Ok(())
    }

    async fn terminate_user(&self, username: &str, target: &DatabaseTarget) -> AppResult<()> {
        ensure_identifier(username)?;

        if let Err(error) = sqlx::query(
            r#"
            SELECT pg_terminate_backend(pid)
            FROM pg_stat_activity
            WHERE usename = $1
            "#,
        )
        .bind(username)
        .execute(&self.pool)
        .await
        {
            debug!(username, %error, "failed to terminate backends");
        }

        match target {
            DatabaseTarget::AllDatabases => self.revoke_cluster(username).await,
            DatabaseTarget::Named(databases) => self.revoke_named(username, databases).await?,
        }

        sqlx::query(&format!("DROP USER IF EXISTS \"{username}\""))
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::DatabaseOperationFailed(format!(
                    "failed to drop user '{username}': {error}"
                ))
            })?;

        Ok(())
    }

    async fn retrieve_user_query_logs(
        &self,
        username: &str,
        _from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<QueryLogRecord>> {
        ensure_identifier(username)?;
        let mut records = Vec::new();

        let rows = sqlx::query_as::<_, (Option<DateTime<Utc>>, Option<String>)>(
            r#"
            SELECT query_start, query
            FROM pg_stat_activity
            WHERE usename = $1 AND query IS NOT NULL AND query <> ''
            "#,
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::DatabaseOperationFailed(format!("failed to read pg_stat_activity: {error}"))
        })?;

        records.extend(rows.into_iter().filter_map(|(query_start, query_text)| {
            query_text.map(|query_text| QueryLogRecord {
                executed_at: query_start.unwrap_or(to),
                query_text,
            })
        }));

        // pg_stat_statements keeps no per-execution timestamps; stamp entries
        // with the harvest upper bound.
        match sqlx::query_scalar::<_, String>(
            r#"
            SELECT s.query
            FROM pg_stat_statements s
            JOIN pg_roles r ON r.oid = s.userid
            WHERE r.rolname = $1
            ORDER BY s.queryid
            LIMIT 1000
            "#,
        )
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
                debug!(%error, "pg_stat_statements not available");
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

#[cfg(test)]
mod tests {
    use pamgate_domain::AccessScope;

    use super::{
        cluster_grant_statements, database_grant_statements, database_revoke_statements,
        named_grant_statements, quote_literal,
    };

    #[test]
    fn each_named_database_gets_equivalent_table_grants() {
        let databases = vec!["orders".to_owned(), "billing".to_owned()];
        let plan = named_grant_statements("pam001_abcde", &databases, AccessScope::ReadOnly);
        assert!(plan.is_ok());

        let plan = plan.unwrap_or_default();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].0, "orders");
        assert_eq!(plan[1].0, "billing");

        let table_grants = plan
            .iter()
            .flat_map(|(_, statements)| statements)
            .filter(|statement| statement.contains("ON ALL TABLES"))
            .count();
        assert_eq!(table_grants, databases.len());
        for (database, statements) in &plan {
            assert!(statements
                .iter()
                .any(|statement| statement
                    .contains(&format!("GRANT CONNECT ON DATABASE \"{database}\""))));
            assert!(statements
                .iter()
                .any(|statement| statement.contains("GRANT SELECT ON ALL TABLES")));
        }
    }

    #[test]
    fn read_only_scope_gets_no_schema_create() {
        let statements = database_grant_statements("u1", "orders", AccessScope::ReadOnly)
            .unwrap_or_default();
        assert!(!statements
            .iter()
            .any(|statement| statement.contains("GRANT CREATE ON SCHEMA")));
    }

    #[test]
    fn ddl_scope_grants_create_on_schema() {
        let statements =
            database_grant_statements("u1", "orders", AccessScope::Ddl).unwrap_or_default();
        assert!(statements
            .iter()
            .any(|statement| statement.contains("GRANT CREATE ON SCHEMA public")));
    }

    #[test]
    fn revokes_mirror_the_grant_set_per_database() {
        let statements = database_revoke_statements("u1", "billing");
        assert!(statements
            .iter()
            .any(|statement| statement.contains("REVOKE ALL PRIVILEGES ON ALL TABLES")));
        assert!(statements
            .iter()
            .any(|statement| statement.contains("REVOKE CONNECT ON DATABASE \"billing\"")));
        assert!(statements
            .iter()
            .any(|statement| statement.contains("DROP OWNED BY")));
    }

    #[test]
    fn cluster_read_only_uses_predefined_role() {
        let statements =
            cluster_grant_statements("u1", AccessScope::ReadOnly).unwrap_or_default();
        assert_eq!(statements, vec!["GRANT pg_read_all_data TO \"u1\"".to_owned()]);
    }

    #[test]
    fn cluster_read_write_adds_write_role() {
        let statements =
            cluster_grant_statements("u1", AccessScope::ReadWrite).unwrap_or_default();
        assert_eq!(statements.len(), 2);
        assert!(statements[1].contains("pg_write_all_data"));
    }

    #[test]
    fn cluster_all_scope_escalates_to_superuser() {
        let statements = cluster_grant_statements("u1", AccessScope::All).unwrap_or_default();
        assert_eq!(statements, vec!["ALTER USER \"u1\" WITH SUPERUSER".to_owned()]);
    }

    #[test]
    fn unsafe_names_are_rejected() {
        let databases = vec!["orders\"; DROP ROLE x".to_owned()];
        assert!(named_grant_statements("u1", &databases, AccessScope::ReadOnly).is_err());
        assert!(cluster_grant_statements("bad\"user", AccessScope::ReadOnly).is_err());
    }

    #[test]
    fn literal_quoting_doubles_single_quotes() {
        assert_eq!(quote_literal("pa'ss"), "pa''ss");
    }
}
