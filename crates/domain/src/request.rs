use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use pamgate_core::{AppError, AppResult, OrgId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::asset::AssetId;
use crate::risk::{RiskAdvisory, RiskRating};
use crate::scope::AccessScope;

/// Shortest access window a request may ask for, in minutes.
pub const MIN_REQUEST_DURATION_MINUTES: i64 = 20;

/// Longest access window a request may ask for, in minutes (30 days).
pub const MAX_REQUEST_DURATION_MINUTES: i64 = 43_200;

/// Access request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a random request identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a request identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Time window access is requested for and granted within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl AccessWindow {
    /// Creates a validated window; the end must be after the start.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<Self> {
        if end <= start {
            return Err(AppError::Validation(
                "access window end must be after its start".to_owned(),
            ));
        }

        Ok(Self { start, end })
    }

    /// Returns the window start.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Returns the window end.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns the window length in whole minutes.
    #[must_use]
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Returns whether the instant falls inside the window.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    /// Returns whether the window has fully passed.
    #[must_use]
    pub fn is_over(&self, now: DateTime<Utc>) -> bool {
        self.end <= now
    }
}

/// Lifecycle state of an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Drafted but not yet submitted for approval.
    Pending,
    /// Awaiting an approver decision.
    Submitted,
    /// Approved; a session has been scheduled.
    Approved,
    /// Rejected by an approver.
    Rejected,
    /// Lapsed without a decision.
    Expired,
    /// Withdrawn by the requester.
    Cancelled,
}

impl RequestStatus {
    /// Returns a stable storage value for this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns whether the status is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::Expired | Self::Cancelled
        )
    }
}

impl FromStr for RequestStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "submitted" => Ok(Self::Submitted),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(AppError::Validation(format!(
                "unknown request status value '{value}'"
            ))),
        }
    }
}

/// Whether a decision approved or rejected the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Request was approved.
    Approved,
    /// Request was rejected.
    Rejected,
}

impl DecisionKind {
    /// Returns a stable storage value for this decision kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for DecisionKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(AppError::Validation(format!(
                "unknown decision kind value '{value}'"
            ))),
        }
    }
}

/// An approver's recorded decision on a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// Approved or rejected.
    pub kind: DecisionKind,
    /// Deciding approver.
    pub decided_by: UserId,
    /// Approver note.
    pub note: String,
    /// Approver risk rating.
    pub risk_rating: RiskRating,
    /// Decision timestamp.
    pub decided_at: DateTime<Utc>,
}

/// Input payload used to construct a validated access request.
#[derive(Debug, Clone)]
pub struct AccessRequestInput {
    /// Owning organization.
    pub org_id: OrgId,
    /// Target asset.
    pub asset_id: AssetId,
    /// Requesting user.
    pub requester_id: UserId,
    /// Requested privilege tier.
    pub scope: AccessScope,
    /// Requested target databases; empty defers to the asset default.
    pub databases: Vec<String>,
    /// Requested access window.
    pub window: AccessWindow,
    /// Free-form justification.
    pub reason: Option<String>,
}

/// A user's ask for time-boxed access to an asset, subject to approval.
///
/// Holds state and validity predicates; effects (persistence, session
/// creation) are performed by the request service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    id: RequestId,
    org_id: OrgId,
    asset_id: AssetId,
    requester_id: UserId,
    scope: AccessScope,
    databases: Vec<String>,
    window: AccessWindow,
    reason: Option<String>,
    status: RequestStatus,
    ai_advisory: Option<RiskAdvisory>,
    decision: Option<ApprovalDecision>,
    cancelled_by: Option<UserId>,
    cancelled_at: Option<DateTime<Utc>>,
}

/// Full persisted shape of an access request, used by repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequestSnapshot {
    /// Request identifier.
    pub id: RequestId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Target asset.
    pub asset_id: AssetId,
    /// Requesting user.
    pub requester_id: UserId,
    /// Requested privilege tier.
    pub scope: AccessScope,
    /// Requested target databases.
    pub databases: Vec<String>,
    /// Requested access window.
    pub window: AccessWindow,
    /// Free-form justification.
    pub reason: Option<String>,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Advisory attached at submission time.
    pub ai_advisory: Option<RiskAdvisory>,
    /// Approver decision, if one was recorded.
    pub decision: Option<ApprovalDecision>,
    /// Cancelling user, if cancelled.
    pub cancelled_by: Option<UserId>,
    /// Cancellation timestamp.
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl AccessRequest {
    /// Creates a validated pending access request.
    pub fn new(input: AccessRequestInput) -> AppResult<Self> {
        let duration = input.window.duration_minutes();
        if duration < MIN_REQUEST_DURATION_MINUTES {
            return Err(AppError::Validation(format!(
                "requested window of {duration} minute(s) is shorter than the \
                 {MIN_REQUEST_DURATION_MINUTES} minute minimum"
            )));
        }

        if duration > MAX_REQUEST_DURATION_MINUTES {
            return Err(AppError::Validation(format!(
                "requested window of {duration} minute(s) exceeds the \
                 {MAX_REQUEST_DURATION_MINUTES} minute maximum"
            )));
        }

        Ok(Self {
            id: RequestId::new(),
            org_id: input.org_id,
            asset_id: input.asset_id,
            requester_id: input.requester_id,
            scope: input.scope,
            databases: input.databases,
            window: input.window,
            reason: input.reason,
            status: RequestStatus::Pending,
            ai_advisory: None,
            decision: None,
            cancelled_by: None,
            cancelled_at: None,
        })
    }

    /// Rebuilds a request from its persisted shape.
    #[must_use]
    pub fn from_snapshot(snapshot: AccessRequestSnapshot) -> Self {
        Self {
            id: snapshot.id,
            org_id: snapshot.org_id,
            asset_id: snapshot.asset_id,
            requester_id: snapshot.requester_id,
            scope: snapshot.scope,
            databases: snapshot.databases,
            window: snapshot.window,
            reason: snapshot.reason,
            status: snapshot.status,
            ai_advisory: snapshot.ai_advisory,
            decision: snapshot.decision,
            cancelled_by: snapshot.cancelled_by,
            cancelled_at: snapshot.cancelled_at,
        }
    }

    /// Returns the persisted shape of the request.
    #[must_use]
    pub fn snapshot(&self) -> AccessRequestSnapshot {
        AccessRequestSnapshot {
            id: self.id,
            org_id: self.org_id,
            asset_id: self.asset_id,
            requester_id: self.requester_id,
            scope: self.scope,
            databases: self.databases.clone(),
            window: self.window,
            reason: self.reason.clone(),
            status: self.status,
            ai_advisory: self.ai_advisory.clone(),
            decision: self.decision.clone(),
            cancelled_by: self.cancelled_by,
            cancelled_at: self.cancelled_at,
        }
    }

    /// Returns the request identifier.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns the owning organization.
    #[must_use]
    pub fn org_id(&self) -> OrgId {
        self.org_id
    }

    /// Returns the target asset.
    #[must_use]
    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    /// Returns the requesting user.
    #[must_use]
    pub fn requester_id(&self) -> UserId {
        self.requester_id
    }

    /// Returns the requested privilege tier.
    #[must_use]
    pub fn scope(&self) -> AccessScope {
        self.scope
    }

    /// Returns the requested target databases; empty defers to the asset.
    #[must_use]
    pub fn databases(&self) -> &[String] {
        &self.databases
    }

    /// Returns the requested access window.
    #[must_use]
    pub fn window(&self) -> AccessWindow {
        self.window
    }

    /// Returns the current lifecycle status.
    #[must_use]
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Returns the advisory attached at submission, if any.
    #[must_use]
    pub fn ai_advisory(&self) -> Option<&RiskAdvisory> {
        self.ai_advisory.as_ref()
    }

    /// Returns the approver decision, if one was recorded.
    #[must_use]
    pub fn decision(&self) -> Option<&ApprovalDecision> {
        self.decision.as_ref()
    }

    /// Returns whether an approver may still decide on this request.
    #[must_use]
    pub fn can_decide(&self, now: DateTime<Utc>) -> bool {
        self.status == RequestStatus::Submitted && !self.window.is_over(now)
    }

    /// Returns whether the request may still be cancelled.
    #[must_use]
    pub fn can_cancel(&self) -> bool {
        matches!(
            self.status,
            RequestStatus::Pending | RequestStatus::Submitted
        )
    }

    /// Returns whether the request has lapsed without a decision.
    #[must_use]
    pub fn can_expire(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            RequestStatus::Pending | RequestStatus::Submitted
        ) && self.window.is_over(now)
    }

    /// Moves a pending request into the approval queue, attaching the
    /// external risk advisory when one was produced.
    pub fn submit(&mut self, advisory: Option<RiskAdvisory>) -> AppResult<()> {
        if self.status != RequestStatus::Pending {
            return Err(AppError::InvalidTransition(format!(
                "request '{}' is {} and cannot be submitted",
                self.id,
                self.status.as_str()
            )));
        }

        self.status = RequestStatus::Submitted;
        self.ai_advisory = advisory;
        Ok(())
    }

    /// Records an approval; the caller is responsible for creating the
    /// session after the new status is persisted.
    pub fn approve(
        &mut self,
        decided_by: UserId,
        note: String,
        risk_rating: RiskRating,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.decide(DecisionKind::Approved, decided_by, note, risk_rating, now)
    }

    /// Records a rejection.
    pub fn reject(
        &mut self,
        decided_by: UserId,
        note: String,
        risk_rating: RiskRating,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.decide(DecisionKind::Rejected, decided_by, note, risk_rating, now)
    }

    fn decide(
        &mut self,
        kind: DecisionKind,
        decided_by: UserId,
        note: String,
        risk_rating: RiskRating,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        if !self.can_decide(now) {
            return Err(AppError::InvalidTransition(format!(
                "request '{}' is {} and not eligible for a decision",
                self.id,
                self.status.as_str()
            )));
        }

        self.status = match kind {
            DecisionKind::Approved => RequestStatus::Approved,
            DecisionKind::Rejected => RequestStatus::Rejected,
        };
        self.decision = Some(ApprovalDecision {
            kind,
            decided_by,
            note,
            risk_rating,
            decided_at: now,
        });
        Ok(())
    }

    /// Expires an undecided request whose window has closed. Any earlier
    /// draft decision data is discarded. A request already in a terminal
    /// state is left untouched.
    pub fn expire(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if self.status.is_terminal() {
            return Ok(());
        }

        if !self.can_expire(now) {
            return Err(AppError::InvalidTransition(format!(
                "request '{}' is {} and not eligible for expiry",
                self.id,
                self.status.as_str()
            )));
        }

        self.status = RequestStatus::Expired;
        self.decision = None;
        Ok(())
    }

    /// Withdraws an undecided request.
    pub fn cancel(&mut self, cancelled_by: UserId, now: DateTime<Utc>) -> AppResult<()> {
        if !self.can_cancel() {
            return Err(AppError::InvalidTransition(format!(
                "request '{}' is {} and cannot be cancelled",
                self.id,
                self.status.as_str()
            )));
        }

        self.status = RequestStatus::Cancelled;
        self.cancelled_by = Some(cancelled_by);
        self.cancelled_at = Some(now);
        Ok(())
    }
}
