use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use pamgate_core::{AppError, AppResult, OrgId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::asset::AssetId;
use crate::request::{AccessRequest, AccessWindow, RequestId, RequestStatus};
use crate::scope::AccessScope;

/// Session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a random session identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a session identifier from an existing UUID value.
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

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Lifecycle state of an access session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Approved and waiting for its window to open or the user to start it.
    Scheduled,
    /// Live; a JIT account exists on the asset.
    Active,
    /// Ended normally by the user.
    Ended,
    /// Force-closed by an operator or policy.
    Terminated,
    /// Lapsed past its scheduled end without ending normally.
    Expired,
    /// Called off before it ever started.
    Cancelled,
}

impl SessionStatus {
    /// Returns a stable storage value for this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Terminated => "terminated",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns whether the status is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Ended | Self::Terminated | Self::Expired | Self::Cancelled
        )
    }
}

impl FromStr for SessionStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "scheduled" => Ok(Self::Scheduled),
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            "terminated" => Ok(Self::Terminated),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(AppError::Validation(format!(
                "unknown session status value '{value}'"
            ))),
        }
    }
}

/// An approved, time-boxed occupancy of an asset by one user.
///
/// Created only from an approved request; the scope, databases, and window
/// are copied verbatim and never widen afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    org_id: OrgId,
    request_id: RequestId,
    asset_id: AssetId,
    user_id: UserId,
    scope: AccessScope,
    databases: Vec<String>,
    window: AccessWindow,
    status: SessionStatus,
    started_at: Option<DateTime<Utc>>,
    checked_in_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    actual_duration_minutes: Option<i64>,
    is_terminated: bool,
    cancelled_by: Option<UserId>,
    cancelled_at: Option<DateTime<Utc>>,
    account_provisioned_at: Option<DateTime<Utc>>,
    account_revoked_at: Option<DateTime<Utc>>,
}

/// Full persisted shape of a session, used by repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session identifier.
    pub id: SessionId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Request the session was created from.
    pub request_id: RequestId,
    /// Target asset.
    pub asset_id: AssetId,
    /// User the session belongs to.
    pub user_id: UserId,
    /// Granted privilege tier.
    pub scope: AccessScope,
    /// Granted target databases.
    pub databases: Vec<String>,
    /// Scheduled access window.
    pub window: AccessWindow,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// When the session went active.
    pub started_at: Option<DateTime<Utc>>,
    /// When the user last checked in.
    pub checked_in_at: Option<DateTime<Utc>>,
    /// When the session closed.
    pub ended_at: Option<DateTime<Utc>>,
    /// Minutes between start and close.
    pub actual_duration_minutes: Option<i64>,
    /// Whether the session was force-closed.
    pub is_terminated: bool,
    /// Cancelling user, if cancelled.
    pub cancelled_by: Option<UserId>,
    /// Cancellation timestamp.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// When the JIT account was provisioned.
    pub account_provisioned_at: Option<DateTime<Utc>>,
    /// When the JIT account was revoked.
    pub account_revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Schedules a session from an approved request, copying the granted
    /// scope, databases, and window verbatim.
    pub fn from_approved_request(request: &AccessRequest) -> AppResult<Self> {
        if request.status() != RequestStatus::Approved {
            return Err(AppError::InvalidTransition(format!(
                "request '{}' is {} and cannot back a session",
                request.id(),
                request.status().as_str()
            )));
        }

        Ok(Self {
            id: SessionId::new(),
            org_id: request.org_id(),
            request_id: request.id(),
            asset_id: request.asset_id(),
            user_id: request.requester_id(),
            scope: request.scope(),
            databases: request.databases().to_vec(),
            window: request.window(),
            status: SessionStatus::Scheduled,
            started_at: None,
            checked_in_at: None,
            ended_at: None,
            actual_duration_minutes: None,
            is_terminated: false,
            cancelled_by: None,
            cancelled_at: None,
            account_provisioned_at: None,
            account_revoked_at: None,
        })
    }

    /// Rebuilds a session from its persisted shape.
    #[must_use]
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            id: snapshot.id,
            org_id: snapshot.org_id,
            request_id: snapshot.request_id,
            asset_id: snapshot.asset_id,
            user_id: snapshot.user_id,
            scope: snapshot.scope,
            databases: snapshot.databases,
            window: snapshot.window,
            status: snapshot.status,
            started_at: snapshot.started_at,
            checked_in_at: snapshot.checked_in_at,
            ended_at: snapshot.ended_at,
            actual_duration_minutes: snapshot.actual_duration_minutes,
            is_terminated: snapshot.is_terminated,
            cancelled_by: snapshot.cancelled_by,
            cancelled_at: snapshot.cancelled_at,
            account_provisioned_at: snapshot.account_provisioned_at,
            account_revoked_at: snapshot.account_revoked_at,
        }
    }

    /// Returns the persisted shape of the session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            org_id: self.org_id,
            request_id: self.request_id,
            asset_id: self.asset_id,
            user_id: self.user_id,
            scope: self.scope,
            databases: self.databases.clone(),
            window: self.window,
            status: self.status,
            started_at: self.started_at,
            checked_in_at: self.checked_in_at,
            ended_at: self.ended_at,
            actual_duration_minutes: self.actual_duration_minutes,
            is_terminated: self.is_terminated,
            cancelled_by: self.cancelled_by,
            cancelled_at: self.cancelled_at,
            account_provisioned_at: self.account_provisioned_at,
            account_revoked_at: self.account_revoked_at,
        }
    }

    /// Returns the session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the owning organization.
    #[must_use]
    pub fn org_id(&self) -> OrgId {
        self.org_id
    }

    /// Returns the request the session was created from.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the target asset.
    #[must_use]
    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    /// Returns the user the session belongs to.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the granted privilege tier.
    #[must_use]
    pub fn scope(&self) -> AccessScope {
        self.scope
    }

    /// Returns the granted target databases; empty defers to the asset.
    #[must_use]
    pub fn databases(&self) -> &[String] {
        &self.databases
    }

    /// Returns the scheduled access window.
    #[must_use]
    pub fn window(&self) -> AccessWindow {
        self.window
    }

    /// Returns the current lifecycle status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Returns when the session went active.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the session closed.
    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Returns whether the session was force-closed.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.is_terminated
    }

    /// Returns whether the session may start right now: it must still be
    /// scheduled and the instant must fall inside its window.
    #[must_use]
    pub fn can_start(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Scheduled && self.window.contains(now)
    }

    /// Returns whether the session is live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Returns whether the session has lapsed past its scheduled end.
    #[must_use]
    pub fn can_expire(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            SessionStatus::Scheduled | SessionStatus::Active
        ) && self.window.is_over(now)
    }

    /// Marks the session active after its JIT account was provisioned.
    pub fn mark_active(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if !self.can_start(now) {
            return Err(AppError::InvalidTransition(format!(
                "session '{}' is {} and cannot start",
                self.id,
                self.status.as_str()
            )));
        }

        self.status = SessionStatus::Active;
        self.started_at = Some(now);
        self.checked_in_at = Some(now);
        self.account_provisioned_at = Some(now);
        Ok(())
    }

    /// Records a user check-in on a live session.
    pub fn check_in(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if self.status != SessionStatus::Active {
            return Err(AppError::InvalidTransition(format!(
                "session '{}' is {} and cannot be checked in",
                self.id,
                self.status.as_str()
            )));
        }

        self.checked_in_at = Some(now);
        Ok(())
    }

    /// Closes a live session normally.
    pub fn mark_ended(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        self.close(SessionStatus::Ended, now)
    }

    /// Force-closes a live session.
    pub fn mark_terminated(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        self.close(SessionStatus::Terminated, now)?;
        self.is_terminated = true;
        Ok(())
    }

    /// Expires a session whose scheduled end has passed. A live session is
    /// closed with its duration recorded; a scheduled one simply lapses.
    pub fn mark_expired(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if !self.can_expire(now) {
            return Err(AppError::InvalidTransition(format!(
                "session '{}' is {} and not eligible for expiry",
                self.id,
                self.status.as_str()
            )));
        }

        if self.status == SessionStatus::Active {
            self.ended_at = Some(now);
            self.actual_duration_minutes = self
                .started_at
                .map(|started_at| (now - started_at).num_minutes());
        }

        self.status = SessionStatus::Expired;
        Ok(())
    }

    /// Calls off a session that never started.
    pub fn mark_cancelled(&mut self, cancelled_by: UserId, now: DateTime<Utc>) -> AppResult<()> {
        if self.status != SessionStatus::Scheduled {
            return Err(AppError::InvalidTransition(format!(
                "session '{}' is {} and cannot be cancelled",
                self.id,
                self.status.as_str()
            )));
        }

        self.status = SessionStatus::Cancelled;
        self.cancelled_by = Some(cancelled_by);
        self.cancelled_at = Some(now);
        Ok(())
    }

    /// Records that the session's JIT account was revoked on the asset.
    pub fn record_account_revoked(&mut self, now: DateTime<Utc>) {
        self.account_revoked_at = Some(now);
    }

    fn close(&mut self, target: SessionStatus, now: DateTime<Utc>) -> AppResult<()> {
        if self.status != SessionStatus::Active {
            return Err(AppError::InvalidTransition(format!(
                "session '{}' is {} and cannot be closed",
                self.id,
                self.status.as_str()
            )));
        }

        self.status = target;
        self.ended_at = Some(now);
        self.actual_duration_minutes = self
            .started_at
            .map(|started_at| (now - started_at).num_minutes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use pamgate_core::{OrgId, UserId};

    use crate::asset::AssetId;
    use crate::request::{AccessRequest, AccessRequestInput, AccessWindow};
    use crate::risk::RiskRating;
    use crate::scope::AccessScope;

    use super::{Session, SessionStatus};

    fn scheduled_session() -> Session {
        let now = Utc::now();
        let window = AccessWindow::new(now - Duration::minutes(5), now + Duration::hours(2));
        assert!(window.is_ok());

        let request = AccessRequest::new(AccessRequestInput {
            org_id: OrgId::new(),
            asset_id: AssetId::new(),
            requester_id: UserId::new(),
            scope: AccessScope::Ddl,
            databases: vec!["orders".to_owned()],
            window: window.unwrap_or_else(|_| unreachable!()),
            reason: None,
        });
        assert!(request.is_ok());
        let mut request = request.unwrap_or_else(|_| unreachable!());
        assert!(request.submit(None).is_ok());
        assert!(
            request
                .approve(UserId::new(), "ok".to_owned(), RiskRating::Low, now)
                .is_ok()
        );

        let session = Session::from_approved_request(&request);
        assert!(session.is_ok());
        session.unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn session_copies_grant_from_request() {
        let session = scheduled_session();
        assert_eq!(session.status(), SessionStatus::Scheduled);
        assert_eq!(session.scope(), AccessScope::Ddl);
        assert_eq!(session.databases(), ["orders".to_owned()]);
    }

    #[test]
    fn session_requires_approved_request() {
        let now = Utc::now();
        let window = AccessWindow::new(now, now + Duration::hours(1));
        assert!(window.is_ok());

        let request = AccessRequest::new(AccessRequestInput {
            org_id: OrgId::new(),
            asset_id: AssetId::new(),
            requester_id: UserId::new(),
            scope: AccessScope::ReadOnly,
            databases: Vec::new(),
            window: window.unwrap_or_else(|_| unreachable!()),
            reason: None,
        });
        assert!(request.is_ok());

        let session =
            Session::from_approved_request(&request.unwrap_or_else(|_| unreachable!()));
        assert!(session.is_err());
    }

    #[test]
    fn start_requires_open_window() {
        let mut session = scheduled_session();
        let before_window = session.window().start() - Duration::minutes(10);
        assert!(session.mark_active(before_window).is_err());
        assert_eq!(session.status(), SessionStatus::Scheduled);

        assert!(session.mark_active(Utc::now()).is_ok());
        assert_eq!(session.status(), SessionStatus::Active);
        assert!(session.started_at().is_some());
    }

    #[test]
    fn end_requires_active_session() {
        let mut session = scheduled_session();
        assert!(session.mark_ended(Utc::now()).is_err());

        assert!(session.mark_active(Utc::now()).is_ok());
        assert!(session.mark_ended(Utc::now()).is_ok());
        assert_eq!(session.status(), SessionStatus::Ended);
        assert!(!session.is_terminated());
        assert!(session.ended_at().is_some());
    }

    #[test]
    fn terminate_flags_the_session() {
        let mut session = scheduled_session();
        assert!(session.mark_active(Utc::now()).is_ok());
        assert!(session.mark_terminated(Utc::now()).is_ok());
        assert_eq!(session.status(), SessionStatus::Terminated);
        assert!(session.is_terminated());
    }

    #[test]
    fn cancel_only_before_start() {
        let mut session = scheduled_session();
        assert!(session.mark_active(Utc::now()).is_ok());
        assert!(session.mark_cancelled(UserId::new(), Utc::now()).is_err());
        assert_eq!(session.status(), SessionStatus::Active);
    }

    #[test]
    fn expire_covers_scheduled_and_active() {
        let past_end = Utc::now() + Duration::days(1);

        let mut scheduled = scheduled_session();
        assert!(scheduled.mark_expired(Utc::now()).is_err());
        assert!(scheduled.mark_expired(past_end).is_ok());
        assert_eq!(scheduled.status(), SessionStatus::Expired);
        assert!(scheduled.ended_at().is_none());

        let mut active = scheduled_session();
        assert!(active.mark_active(Utc::now()).is_ok());
        assert!(active.mark_expired(past_end).is_ok());
        assert_eq!(active.status(), SessionStatus::Expired);
        assert!(active.ended_at().is_some());
    }

    #[test]
    fn terminal_session_rejects_further_transitions() {
        let mut session = scheduled_session();
        assert!(session.mark_active(Utc::now()).is_ok());
        assert!(session.mark_ended(Utc::now()).is_ok());

        assert!(session.mark_active(Utc::now()).is_err());
        assert!(session.mark_terminated(Utc::now()).is_err());
        assert!(session.check_in(Utc::now()).is_err());
        assert!(
            session
                .mark_expired(Utc::now() + Duration::days(1))
                .is_err()
        );
    }
}
