use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pamgate_core::{AppResult, OrgId};
use pamgate_domain::{AccessRequest, RequestId, RequestStatus, RiskAdvisory};

/// Repository port for access requests.
#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Persists one newly created request.
    async fn create(&self, request: &AccessRequest) -> AppResult<()>;

    /// Returns one request by identifier.
    async fn find(&self, org_id: OrgId, id: RequestId) -> AppResult<Option<AccessRequest>>;

    /// Persists a status transition guarded on the previous status.
    ///
    /// Returns `AppError::Conflict` when the stored row is no longer in
    /// `from_status`, which means a concurrent actor won the transition.
    async fn persist_transition(
        &self,
        request: &AccessRequest,
        from_status: RequestStatus,
    ) -> AppResult<()>;

    /// Lists undecided requests whose window closed at or before `now`.
    async fn list_overdue(&self, now: DateTime<Utc>, limit: u32) -> AppResult<Vec<AccessRequest>>;
}

/// Port for the external risk evaluator consulted at submission time.
#[async_trait]
pub trait RiskAdvisor: Send + Sync {
    /// Produces an advisory for the request, or `None` when the evaluator
    /// has nothing to say about it.
    async fn evaluate(&self, request: &AccessRequest) -> AppResult<Option<RiskAdvisory>>;
}
