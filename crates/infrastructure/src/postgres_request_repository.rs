use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use pamgate_application::RequestRepository;
use pamgate_core::{AppError, AppResult, OrgId, UserId};
use pamgate_domain::{
    AccessRequest, AccessRequestSnapshot, AccessScope, AccessWindow, ApprovalDecision, AssetId,
    DecisionKind, RequestId, RequestStatus, RiskAdvisory, RiskRating,
};

/// PostgreSQL-backed access request repository.
#[derive(Clone)]
pub struct PostgresRequestRepository {
    pool: PgPool,
}

impl PostgresRequestRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct AccessRequestRow {
    id: Uuid,
    org_id: Uuid,
    asset_id: Uuid,
    requester_id: Uuid,
    scope: String,
    databases: Vec<String>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    reason: Option<String>,
    status: String,
    ai_note: Option<String>,
    ai_rating: Option<String>,
    decision_kind: Option<String>,
    decided_by: Option<Uuid>,
    decision_note: Option<String>,
    decision_risk_rating: Option<String>,
    decided_at: Option<DateTime<Utc>>,
    cancelled_by: Option<Uuid>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl AccessRequestRow {
    fn into_request(self) -> AppResult<AccessRequest> {
        let window = AccessWindow::new(self.window_start, self.window_end)?;

        let ai_advisory = match (self.ai_note, self.ai_rating) {
            (Some(note), Some(rating)) => Some(RiskAdvisory {
                note,
                rating: RiskRating::from_str(&rating)?,
            }),
            _ => None,
        };

        let decision = match (
            self.decision_kind,
            self.decided_by,
            self.decision_note,
            self.decision_risk_rating,
            self.decided_at,
        ) {
            (Some(kind), Some(decided_by), Some(note), Some(risk_rating), Some(decided_at)) => {
                Some(ApprovalDecision {
                    kind: DecisionKind::from_str(&kind)?,
                    decided_by: UserId::from_uuid(decided_by),
                    note,
                    risk_rating: RiskRating::from_str(&risk_rating)?,
                    decided_at,
                })
            }
            _ => None,
        };

        Ok(AccessRequest::from_snapshot(AccessRequestSnapshot {
            id: RequestId::from_uuid(self.id),
            org_id: OrgId::from_uuid(self.org_id),
            asset_id: AssetId::from_uuid(self.asset_id),
            requester_id: UserId::from_uuid(self.requester_id),
            scope: AccessScope::from_str(&self.scope)?,
            databases: self.databases,
            window,
            reason: self.reason,
            status: RequestStatus::from_str(&self.status)?,
            ai_advisory,
            decision,
            cancelled_by: self.cancelled_by.map(UserId::from_uuid),
            cancelled_at: self.cancelled_at,
        }))
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        id,
        org_id,
        asset_id,
        requester_id,
        scope,
        databases,
        window_start,
        window_end,
        reason,
        status,
        ai_note,
        ai_rating,
        decision_kind,
        decided_by,
        decision_note,
        decision_risk_rating,
        decided_at,
        cancelled_by,
        cancelled_at
    FROM access_requests
"#;

#[async_trait]
impl RequestRepository for PostgresRequestRepository {
    async fn create(&self, request: &AccessRequest) -> AppResult<()> {
        let snapshot = request.snapshot();
        sqlx::query(
            r#"
            INSERT INTO access_requests (
                id,
                org_id,
                asset_id,
                requester_id,
                scope,
                databases,
                window_start,
                window_end,
                reason,
                status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(snapshot.id.as_uuid())
        .bind(snapshot.org_id.as_uuid())
        .bind(snapshot.asset_id.as_uuid())
        .bind(snapshot.requester_id.as_uuid())
        .bind(snapshot.scope.as_str())
        .bind(&snapshot.databases)
        .bind(snapshot.window.start())
        .bind(snapshot.window.end())
        .bind(&snapshot.reason)
        .bind(snapshot.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to create request: {error}")))?;

        Ok(())
    }

    async fn find(&self, org_id: OrgId, id: RequestId) -> AppResult<Option<AccessRequest>> {
        let row = sqlx::query_as::<_, AccessRequestRow>(&format!(
            "{SELECT_COLUMNS} WHERE id = $1 AND org_id = $2"
        ))
        .bind(id.as_uuid())
        .bind(org_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to load request: {error}")))?;

        row.map(AccessRequestRow::into_request).transpose()
    }

    async fn persist_transition(
        &self,
        request: &AccessRequest,
        from_status: RequestStatus,
    ) -> AppResult<()> {
        let snapshot = request.snapshot();
        let decision = snapshot.decision.as_ref();
        let advisory = snapshot.ai_advisory.as_ref();

        let result = sqlx::query(
            r#"
            UPDATE access_requests
            SET
                status = $3,
                ai_note = $4,
                ai_rating = $5,
                decision_kind = $6,
                decided_by = $7,
                decision_note = $8,
                decision_risk_rating = $9,
                decided_at = $10,
                cancelled_by = $11,
                cancelled_at = $12
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(snapshot.id.as_uuid())
        .bind(from_status.as_str())
        .bind(snapshot.status.as_str())
        .bind(advisory.map(|advisory| advisory.note.clone()))
        .bind(advisory.map(|advisory| advisory.rating.as_str()))
        .bind(decision.map(|decision| decision.kind.as_str()))
        .bind(decision.map(|decision| decision.decided_by.as_uuid()))
        .bind(decision.map(|decision| decision.note.clone()))
        .bind(decision.map(|decision| decision.risk_rating.as_str()))
        .bind(decision.map(|decision| decision.decided_at))
        .bind(snapshot.cancelled_by.map(|cancelled_by| cancelled_by.as_uuid()))
        .bind(snapshot.cancelled_at)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to update request: {error}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "request '{}' is no longer {}",
                snapshot.id,
                from_status.as_str()
            )));
        }

        Ok(())
    }

    async fn list_overdue(&self, now: DateTime<Utc>, limit: u32) -> AppResult<Vec<AccessRequest>> {
        let rows = sqlx::query_as::<_, AccessRequestRow>(&format!(
            r#"
            {SELECT_COLUMNS}
            WHERE status IN ('pending', 'submitted') AND window_end <= $1
            ORDER BY window_end
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list overdue requests: {error}")))?;

        rows.into_iter()
            .map(AccessRequestRow::into_request)
            .collect()
    }
}
