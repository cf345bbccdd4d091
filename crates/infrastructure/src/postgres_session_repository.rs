use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use pamgate_application::SessionRepository;
use pamgate_core::{AppError, AppResult, OrgId, UserId};
use pamgate_domain::{
    AccessScope, AccessWindow, AssetId, RequestId, Session, SessionId, SessionSnapshot,
    SessionStatus,
};

/// PostgreSQL-backed session repository.
#[derive(Clone)]
pub struct PostgresSessionRepository {
    pool: PgPool,
}

impl PostgresSessionRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    org_id: Uuid,
    request_id: Uuid,
    asset_id: Uuid,
    user_id: Uuid,
    scope: String,
    databases: Vec<String>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    status: String,
    started_at: Option<DateTime<Utc>>,
    checked_in_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    actual_duration_minutes: Option<i64>,
    is_terminated: bool,
    cancelled_by: Option<Uuid>,
    cancelled_at: Option<DateTime<Utc>>,
    account_provisioned_at: Option<DateTime<Utc>>,
    account_revoked_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    fn into_session(self) -> AppResult<Session> {
        let window = AccessWindow::new(self.window_start, self.window_end)?;

        Ok(Session::from_snapshot(SessionSnapshot {
            id: SessionId::from_uuid(self.id),
            org_id: OrgId::from_uuid(self.org_id),
            request_id: RequestId::from_uuid(self.request_id),
            asset_id: AssetId::from_uuid(self.asset_id),
            user_id: UserId::from_uuid(self.user_id),
            scope: AccessScope::from_str(&self.scope)?,
            databases: self.databases,
            window,
            status: SessionStatus::from_str(&self.status)?,
            started_at: self.started_at,
            checked_in_at: self.checked_in_at,
            ended_at: self.ended_at,
            actual_duration_minutes: self.actual_duration_minutes,
            is_terminated: self.is_terminated,
            cancelled_by: self.cancelled_by.map(UserId::from_uuid),
            cancelled_at: self.cancelled_at,
            account_provisioned_at: self.account_provisioned_at,
            account_revoked_at: self.account_revoked_at,
        }))
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        id,
        org_id,
        request_id,
        asset_id,
        user_id,
        scope,
        databases,
        window_start,
        window_end,
        status,
        started_at,
        checked_in_at,
        ended_at,
        actual_duration_minutes,
        is_terminated,
        cancelled_by,
        cancelled_at,
        account_provisioned_at,
        account_revoked_at
    FROM sessions
"#;

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn create(&self, session: &Session) -> AppResult<()> {
        let snapshot = session.snapshot();
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (
                id,
                org_id,
                request_id,
                asset_id,
                user_id,
                scope,
                databases,
                window_start,
                window_end,
                status,
                is_terminated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(snapshot.id.as_uuid())
        .bind(snapshot.org_id.as_uuid())
        .bind(snapshot.request_id.as_uuid())
        .bind(snapshot.asset_id.as_uuid())
        .bind(snapshot.user_id.as_uuid())
        .bind(snapshot.scope.as_str())
        .bind(&snapshot.databases)
        .bind(snapshot.window.start())
        .bind(snapshot.window.end())
        .bind(snapshot.status.as_str())
        .bind(snapshot.is_terminated)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to create session: {error}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "request '{}' already has a session",
                snapshot.request_id
            )));
        }

        Ok(())
    }

    async fn find(&self, org_id: OrgId, id: SessionId) -> AppResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "{SELECT_COLUMNS} WHERE id = $1 AND org_id = $2"
        ))
        .bind(id.as_uuid())
        .bind(org_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to load session: {error}")))?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn find_by_id(&self, id: SessionId) -> AppResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| AppError::Internal(format!("failed to load session: {error}")))?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn find_by_request(
        &self,
        org_id: OrgId,
        request_id: RequestId,
    ) -> AppResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "{SELECT_COLUMNS} WHERE request_id = $1 AND org_id = $2"
        ))
        .bind(request_id.as_uuid())
        .bind(org_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to load session: {error}")))?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn persist_transition(
        &self,
        session: &Session,
        from_status: SessionStatus,
    ) -> AppResult<()> {
        let snapshot = session.snapshot();
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET
                status = $3,
                started_at = $4,
                checked_in_at = $5,
                ended_at = $6,
                actual_duration_minutes = $7,
                is_terminated = $8,
                cancelled_by = $9,
                cancelled_at = $10,
                account_provisioned_at = $11,
                account_revoked_at = $12
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(snapshot.id.as_uuid())
        .bind(from_status.as_str())
        .bind(snapshot.status.as_str())
        .bind(snapshot.started_at)
        .bind(snapshot.checked_in_at)
        .bind(snapshot.ended_at)
        .bind(snapshot.actual_duration_minutes)
        .bind(snapshot.is_terminated)
        .bind(snapshot.cancelled_by.map(|cancelled_by| cancelled_by.as_uuid()))
        .bind(snapshot.cancelled_at)
        .bind(snapshot.account_provisioned_at)
        .bind(snapshot.account_revoked_at)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to update session: {error}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "session '{}' is no longer {}",
                snapshot.id,
                from_status.as_str()
            )));
        }

        Ok(())
    }

    async fn list_overdue(&self, now: DateTime<Utc>, limit: u32) -> AppResult<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            {SELECT_COLUMNS}
            WHERE status IN ('scheduled', 'active') AND window_end <= $1
            ORDER BY window_end
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list overdue sessions: {error}")))?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }
}
