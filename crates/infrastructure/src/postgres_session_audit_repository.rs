use async_trait::async_trait;
use sqlx::PgPool;

use pamgate_application::SessionAuditRepository;
use pamgate_core::{AppError, AppResult};
use pamgate_domain::SessionAuditEntry;

/// PostgreSQL-backed store for harvested session query logs.
#[derive(Clone)]
pub struct PostgresSessionAuditRepository {
    pool: PgPool,
}

impl PostgresSessionAuditRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionAuditRepository for PostgresSessionAuditRepository {
    async fn append_entries(&self, entries: &[SessionAuditEntry]) -> AppResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| AppError::Internal(format!("failed to begin transaction: {error}")))?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO session_audits (
                    org_id,
                    session_id,
                    request_id,
                    asset_id,
                    user_id,
                    username,
                    query_text,
                    query_timestamp
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(entry.org_id.as_uuid())
            .bind(entry.session_id.as_uuid())
            .bind(entry.request_id.as_uuid())
            .bind(entry.asset_id.as_uuid())
            .bind(entry.user_id.as_uuid())
            .bind(&entry.username)
            .bind(&entry.query_text)
            .bind(entry.query_timestamp)
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to append session audit: {error}"))
            })?;
        }

        transaction
            .commit()
            .await
            .map_err(|error| AppError::Internal(format!("failed to commit transaction: {error}")))?;

        Ok(())
    }
}
