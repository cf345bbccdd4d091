use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pamgate_core::AppResult;
use pamgate_domain::{AccountId, AssetAccount, AssetId, NewAssetAccountInput, SessionId};

/// Decrypted admin credential handed to a driver at the provisioning
/// boundary. Never persisted in this form.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    /// Admin username.
    pub username: String,
    /// Decrypted admin password.
    pub password: String,
}

/// Freshly generated JIT credential pair before encryption.
#[derive(Debug, Clone)]
pub struct GeneratedCredentials {
    /// Generated username.
    pub username: String,
    /// Generated plaintext password.
    pub password: String,
}

/// Repository port for credential rows on assets.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Returns the active admin account for an asset, if one exists.
    async fn find_active_admin(&self, asset_id: AssetId) -> AppResult<Option<AssetAccount>>;

    /// Returns one account by identifier.
    async fn find(&self, id: AccountId) -> AppResult<Option<AssetAccount>>;

    /// Returns the active JIT account bound to a session, if one exists.
    async fn find_active_jit_for_session(
        &self,
        session_id: SessionId,
    ) -> AppResult<Option<AssetAccount>>;

    /// Persists a new JIT account row.
    ///
    /// Returns `AppError::Conflict` when the session already has an active
    /// JIT account; the insert doubles as the session's provisioning claim.
    async fn insert_jit(&self, input: NewAssetAccountInput) -> AppResult<AssetAccount>;

    /// Returns whether an active account with the username exists on the
    /// asset.
    async fn username_exists_active(&self, asset_id: AssetId, username: &str) -> AppResult<bool>;

    /// Retires an account row, keeping it for audit history.
    async fn deactivate(&self, id: AccountId, ended_at: DateTime<Utc>) -> AppResult<()>;

    /// Deletes an account row outright. Used only to unwind a provisioning
    /// claim whose grant never happened.
    async fn delete(&self, id: AccountId) -> AppResult<()>;

    /// Lists active JIT accounts whose expiry passed at or before `now`.
    async fn list_expired_active_jit(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> AppResult<Vec<AssetAccount>>;
}
