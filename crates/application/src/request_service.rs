use std::sync::Arc;

use chrono::{DateTime, Utc};
use pamgate_core::{Actor, AppError, AppResult};
use pamgate_domain::{
    AccessRequest, AccessRequestInput, AccessScope, AccessWindow, AssetId, AuditAction, RequestId,
    RiskRating, Session,
};
use tracing::warn;

use crate::audit_ports::{AuditEvent, AuditRepository};
use crate::request_ports::{RequestRepository, RiskAdvisor};
use crate::secrets_ports::AssetRepository;
use crate::session_ports::SessionRepository;


/// Details for drafting a new access request.
#[derive(Debug, Clone)]
pub struct NewRequestInput {
    /// Target asset.
    pub asset_id: AssetId,
    /// Requested privilege tier.
    pub scope: AccessScope,
    /// Requested target databases; empty defers to the asset default.
    pub databases: Vec<String>,
    /// Requested access window.
    pub window: AccessWindow,
    /// Free-form justification.
    pub reason: Option<String>,
}

/// Lifecycle service for access requests: drafting, submission, decisions,
/// cancellation, and expiry sweeps.
#[derive(Clone)]
pub struct RequestService {
    requests: Arc<dyn RequestRepository>,
    sessions: Arc<dyn SessionRepository>,
    assets: Arc<dyn AssetRepository>,
    audit_repository: Arc<dyn AuditRepository>,
    risk_advisor: Option<Arc<dyn RiskAdvisor>>,
}

impl RequestService {
    /// Creates a request service.
    #[must_use]
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        sessions: Arc<dyn SessionRepository>,
        assets: Arc<dyn AssetRepository>,
        audit_repository: Arc<dyn AuditRepository>,
    ) -> Self {
        Self {
            requests,
            sessions,
            assets,
            audit_repository,
            risk_advisor: None,
        }
    }

    /// Adds an external risk evaluator consulted at submission time.
    #[must_use]
    pub fn with_risk_advisor(mut self, risk_advisor: Arc<dyn RiskAdvisor>) -> Self {
        self.risk_advisor = Some(risk_advisor);
        self
    }

    /// Drafts a pending request for the acting user.
    pub async fn create(&self, actor: &Actor, input: NewRequestInput) -> AppResult<AccessRequest> {
        let asset = self.assets.find(actor.org_id(), input.asset_id).await?;
        if asset.is_none() {
            return Err(AppError::NotFound(format!(
                "asset '{}' does not exist",
                input.asset_id
            )));
        }

        let request = AccessRequest::new(AccessRequestInput {
            org_id: actor.org_id(),
            asset_id: input.asset_id,
            requester_id: actor.user_id(),
            scope: input.scope,
            databases: input.databases,
            window: input.window,
            reason: input.reason,
        })?;
        self.requests.create(&request).await?;
        Ok(request)
    }

    /// Moves a pending request into the approval queue. Only the requester
    /// may submit. A risk advisor failure degrades to no advisory.
    pub async fn submit(&self, actor: &Actor, id: RequestId) -> AppResult<AccessRequest> {
        let mut request = self.require(actor, id).await?;
        if request.requester_id() != actor.user_id() {
            return Err(AppError::Forbidden(
                "only the requester may submit a request".to_owned(),
            ));
        }

        let advisory = match &self.risk_advisor {
            Some(advisor) => match advisor.evaluate(&request).await {
                Ok(advisory) => advisory,
                Err(error) => {
                    warn!(request_id = %id, %error, "risk advisor unavailable; submitting without advisory");
                    None
                }
            },
            None => None,
        };

        let from_status = request.status();
        request.submit(advisory)?;
        self.requests.persist_transition(&request, from_status).await?;
        self.record(actor, AuditAction::RequestSubmitted, &request, None)
            .await?;
        Ok(request)
    }

    /// Approves a submitted request and schedules its session. The requester
    /// may not decide their own request.
    pub async fn approve(
        &self,
        actor: &Actor,
        id: RequestId,
        note: String,
        risk_rating: RiskRating,
    ) -> AppResult<(AccessRequest, Session)> {
        let mut request = self.require(actor, id).await?;
        if request.requester_id() == actor.user_id() {
            return Err(AppError::Forbidden(
                "a requester may not decide their own request".to_owned(),
            ));
        }

        let from_status = request.status();
        request.approve(actor.user_id(), note, risk_rating, Utc::now())?;
        self.requests.persist_transition(&request, from_status).await?;

        let session = Session::from_approved_request(&request)?;
        match self.sessions.create(&session).await {
            Ok(()) => {}
            // A session row already exists for this request; keep it.
            Err(AppError::Conflict(_)) => {}
            Err(error) => return Err(error),
        }

        self.record(actor, AuditAction::RequestApproved, &request, None)
            .await?;
        Ok((request, session))
    }

    /// Rejects a submitted request.
    pub async fn reject(
        &self,
        actor: &Actor,
        id: RequestId,
        note: String,
        risk_rating: RiskRating,
    ) -> AppResult<AccessRequest> {
        let mut request = self.require(actor, id).await?;
        if request.requester_id() == actor.user_id() {
            return Err(AppError::Forbidden(
                "a requester may not decide their own request".to_owned(),
            ));
        }

        let from_status = request.status();
        request.reject(actor.user_id(), note, risk_rating, Utc::now())?;
        self.requests.persist_transition(&request, from_status).await?;
        self.record(actor, AuditAction::RequestRejected, &request, None)
            .await?;
        Ok(request)
    }

    /// Withdraws an undecided request. Only the requester may cancel.
    pub async fn cancel(&self, actor: &Actor, id: RequestId) -> AppResult<AccessRequest> {
        let mut request = self.require(actor, id).await?;
        if request.requester_id() != actor.user_id() {
            return Err(AppError::Forbidden(
                "only the requester may cancel a request".to_owned(),
            ));
        }

        let from_status = request.status();
        request.cancel(actor.user_id(), Utc::now())?;
        self.requests.persist_transition(&request, from_status).await?;
        self.record(actor, AuditAction::RequestCancelled, &request, None)
            .await?;
        Ok(request)
    }

    /// Expires every undecided request whose window closed at or before
    /// `now`. Per-row failures are logged and skipped; returns the number of
    /// requests expired.
    pub async fn expire_overdue(&self, now: DateTime<Utc>, limit: u32) -> AppResult<u32> {
        let overdue = self.requests.list_overdue(now, limit).await?;
        let mut expired = 0;
        for mut request in overdue {
            let from_status = request.status();
            let outcome = match request.expire(now) {
                Ok(()) => self.requests.persist_transition(&request, from_status).await,
                Err(error) => Err(error),
            };

            match outcome {
                Ok(()) => {
                    let event = AuditEvent {
                        org_id: request.org_id(),
                        subject: "system".to_owned(),
                        action: AuditAction::RequestExpired,
                        resource_type: "access_request".to_owned(),
                        resource_id: request.id().to_string(),
                        detail: None,
                    };
                    self.audit_repository.append_event(event).await?;
                    expired += 1;
                }
                Err(error) => {
                    warn!(request_id = %request.id(), %error, "skipping overdue request");
                }
            }
        }

        Ok(expired)
    }

    async fn require(&self, actor: &Actor, id: RequestId) -> AppResult<AccessRequest> {
        self.requests
            .find(actor.org_id(), id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("request '{id}' does not exist")))
    }

    async fn record(
        &self,
        actor: &Actor,
        action: AuditAction,
        request: &AccessRequest,
        detail: Option<String>,
    ) -> AppResult<()> {
        self.audit_repository
            .append_event(AuditEvent {
                org_id: actor.org_id(),
                subject: actor.user_id().to_string(),
                action,
                resource_type: "access_request".to_owned(),
                resource_id: request.id().to_string(),
                detail,
            })
            .await
    }
}
