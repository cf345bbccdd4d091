use chrono::{DateTime, Utc};
use pamgate_core::{OrgId, UserId};
use serde::{Deserialize, Serialize};

use crate::asset::AssetId;
use crate::request::RequestId;
use crate::session::SessionId;

/// Lifecycle action recorded in the action audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A request entered the approval queue.
    RequestSubmitted,
    /// A request was approved.
    RequestApproved,
    /// A request was rejected.
    RequestRejected,
    /// A request lapsed without a decision.
    RequestExpired,
    /// A request was withdrawn by its requester.
    RequestCancelled,
    /// A session went active.
    SessionStarted,
    /// A session ended normally.
    SessionEnded,
    /// A session was force-closed.
    SessionTerminated,
    /// A session lapsed past its scheduled end.
    SessionExpired,
    /// A session was called off before starting.
    SessionCancelled,
    /// A JIT account was created on an asset.
    JitAccountCreated,
    /// A JIT account was revoked on an asset.
    JitAccountRevoked,
}

impl AuditAction {
    /// Returns a stable storage value for this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestSubmitted => "request.submitted",
            Self::RequestApproved => "request.approved",
            Self::RequestRejected => "request.rejected",
            Self::RequestExpired => "request.expired",
            Self::RequestCancelled => "request.cancelled",
            Self::SessionStarted => "session.started",
            Self::SessionEnded => "session.ended",
            Self::SessionTerminated => "session.terminated",
            Self::SessionExpired => "session.expired",
            Self::SessionCancelled => "session.cancelled",
            Self::JitAccountCreated => "jit_account.created",
            Self::JitAccountRevoked => "jit_account.revoked",
        }
    }
}

/// One raw statement harvested from a target server's query log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLogRecord {
    /// When the statement ran on the server.
    pub executed_at: DateTime<Utc>,
    /// Statement text as logged by the server.
    pub query_text: String,
}

/// A harvested statement attributed to a session, ready for persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAuditEntry {
    /// Owning organization.
    pub org_id: OrgId,
    /// Session the statement ran under.
    pub session_id: SessionId,
    /// Request behind the session.
    pub request_id: RequestId,
    /// Asset the statement ran on.
    pub asset_id: AssetId,
    /// User the session belongs to.
    pub user_id: UserId,
    /// JIT username the statement was issued as, when the log reports it.
    pub username: Option<String>,
    /// Statement text.
    pub query_text: String,
    /// When the statement ran.
    pub query_timestamp: DateTime<Utc>,
}
