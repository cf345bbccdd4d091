//! Domain entities and invariants for the JIT credential lifecycle.

#![forbid(unsafe_code)]

mod asset;
mod audit;
mod request;
mod risk;
mod scope;
mod session;

pub use asset::{
    AccountId, AccountType, Asset, AssetAccount, AssetId, Dbms, NewAssetAccountInput,
};
pub use audit::{AuditAction, QueryLogRecord, SessionAuditEntry};
pub use request::{
    AccessRequest, AccessRequestInput, AccessRequestSnapshot, AccessWindow, ApprovalDecision,
    DecisionKind, MAX_REQUEST_DURATION_MINUTES, MIN_REQUEST_DURATION_MINUTES, RequestId,
    RequestStatus,
};
pub use risk::{RiskAdvisory, RiskRating};
pub use scope::AccessScope;
pub use session::{Session, SessionId, SessionSnapshot, SessionStatus};
