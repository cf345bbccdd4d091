use async_trait::async_trait;
use pamgate_core::{AppResult, OrgId};
use pamgate_domain::{Asset, AssetId, SessionAuditEntry};

/// Repository port for managed target assets.
#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Returns one asset by identifier.
    async fn find(&self, org_id: OrgId, id: AssetId) -> AppResult<Option<Asset>>;

    /// Returns one asset by identifier without an organization scope.
    /// Reserved for system sweeps.
    async fn find_by_id(&self, id: AssetId) -> AppResult<Option<Asset>>;
}

/// Port for persisting harvested session query logs.
#[async_trait]
pub trait SessionAuditRepository: Send + Sync {
    /// Persists harvested statements for a session.
    async fn append_entries(&self, entries: &[SessionAuditEntry]) -> AppResult<()>;
}
