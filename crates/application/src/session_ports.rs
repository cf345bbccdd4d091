use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pamgate_core::{AppResult, OrgId};
use pamgate_domain::{RequestId, Session, SessionId, SessionStatus};

/// Repository port for access sessions.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persists one newly scheduled session.
    ///
    /// Returns `AppError::Conflict` when a session already exists for the
    /// backing request.
    async fn create(&self, session: &Session) -> AppResult<()>;

    /// Returns one session by identifier.
    async fn find(&self, org_id: OrgId, id: SessionId) -> AppResult<Option<Session>>;

    /// Returns one session by identifier without an organization scope.
    /// Reserved for system sweeps.
    async fn find_by_id(&self, id: SessionId) -> AppResult<Option<Session>>;

    /// Returns the session created for a request, if any.
    async fn find_by_request(
        &self,
        org_id: OrgId,
        request_id: RequestId,
    ) -> AppResult<Option<Session>>;

    /// Persists a status transition guarded on the previous status.
    ///
    /// Returns `AppError::Conflict` when the stored row is no longer in
    /// `from_status`, which means a concurrent actor won the transition.
    async fn persist_transition(
        &self,
        session: &Session,
        from_status: SessionStatus,
    ) -> AppResult<()>;

    /// Lists live or scheduled sessions whose window closed at or before
    /// `now`.
    async fn list_overdue(&self, now: DateTime<Utc>, limit: u32) -> AppResult<Vec<Session>>;
}
