use std::sync::Arc;

use chrono::{DateTime, Utc};
use pamgate_core::{AppError, AppResult};
use pamgate_domain::{
    AccessScope, AccountType, Asset, AssetAccount, AuditAction, NewAssetAccountInput,
    QueryLogRecord, Session, SessionAuditEntry,
};
use tracing::warn;

use crate::audit_ports::{AuditEvent, AuditRepository};
use crate::secrets_ports::{
    AccountRepository, AdminCredentials, AssetRepository, DatabaseDriver, DatabaseTarget,
    DriverFactory, GeneratedCredentials, SecretEncryptor, SessionAuditRepository,
    TerminationOutcome,
};
use crate::session_ports::SessionRepository;

mod credentials;

pub use credentials::CredentialPolicy;

const MAX_USERNAME_ATTEMPTS: usize = 5;

/// Service owning the JIT credential lifecycle on target servers: admin
/// credential resolution, account provisioning, best-effort teardown, and
/// the expired-account sweep.
#[derive(Clone)]
pub struct SecretsService {
    accounts: Arc<dyn AccountRepository>,
    assets: Arc<dyn AssetRepository>,
    sessions: Arc<dyn SessionRepository>,
    session_audit: Arc<dyn SessionAuditRepository>,
    audit_repository: Arc<dyn AuditRepository>,
    encryptor: Arc<dyn SecretEncryptor>,
    driver_factory: Arc<dyn DriverFactory>,
    policy: CredentialPolicy,
}

impl SecretsService {
    /// Creates a secrets service.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        assets: Arc<dyn AssetRepository>,
        sessions: Arc<dyn SessionRepository>,
        session_audit: Arc<dyn SessionAuditRepository>,
        audit_repository: Arc<dyn AuditRepository>,
        encryptor: Arc<dyn SecretEncryptor>,
        driver_factory: Arc<dyn DriverFactory>,
        policy: CredentialPolicy,
    ) -> Self {
        Self {
            accounts,
            assets,
            sessions,
            session_audit,
            audit_repository,
            encryptor,
            driver_factory,
            policy,
        }
    }

    /// Resolves which databases a session's grant applies to: databases
    /// named on the session win, then the asset default, then every
    /// database on the server.
    #[must_use]
    pub fn resolve_target(session: &Session, asset: &Asset) -> DatabaseTarget {
        if !session.databases().is_empty() {
            DatabaseTarget::Named(session.databases().to_vec())
        } else if !asset.default_databases.is_empty() {
            DatabaseTarget::Named(asset.default_databases.clone())
        } else {
            DatabaseTarget::AllDatabases
        }
    }

    /// Returns the decrypted admin credential for an asset.
    pub async fn admin_credentials(&self, asset: &Asset) -> AppResult<AdminCredentials> {
        let account = self
            .accounts
            .find_active_admin(asset.id)
            .await?
            .ok_or_else(|| {
                AppError::NoActiveAdminAccount(format!(
                    "asset '{}' has no active admin account",
                    asset.id
                ))
            })?;

        let password = self.encryptor.decrypt(&account.password_ciphertext)?;
        Ok(AdminCredentials {
            username: account.username,
            password,
        })
    }

    /// Connects an engine driver for an asset using its admin credential
    /// and verifies the connection is usable.
    pub async fn database_driver(&self, asset: &Asset) -> AppResult<Arc<dyn DatabaseDriver>> {
        let admin = self.admin_credentials(asset).await?;
        let target = DatabaseTarget::from_databases(&asset.default_databases);
        let driver = self.driver_factory.connect(asset, &admin, &target).await?;
        driver.test_connection().await?;
        Ok(driver)
    }

    /// Returns whether the asset's engine can express the scope.
    pub async fn validate_scope(&self, asset: &Asset, scope: AccessScope) -> AppResult<bool> {
        let driver = self.database_driver(asset).await?;
        Ok(driver.supports_scope(scope))
    }

    /// Generates a credential pair whose username is not currently active on
    /// the asset.
    pub async fn generate_credentials(&self, asset: &Asset) -> AppResult<GeneratedCredentials> {
        for _ in 0..MAX_USERNAME_ATTEMPTS {
            let generated = self.policy.generate()?;
            if !self
                .accounts
                .username_exists_active(asset.id, &generated.username)
                .await?
            {
                return Ok(generated);
            }
        }

        Err(AppError::Internal(format!(
            "no unused jit username found on asset '{}' after {MAX_USERNAME_ATTEMPTS} attempts",
            asset.id
        )))
    }

    /// Fetches the raw query log for a session's active JIT account without
    /// tearing the account down.
    pub async fn retrieve_query_logs(
        &self,
        session: &Session,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<QueryLogRecord>> {
        let account = self
            .accounts
            .find_active_jit_for_session(session.id())
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "session '{}' has no active jit account",
                    session.id()
                ))
            })?;

        let target = DatabaseTarget::from_databases(&account.databases);
        let driver = self.connect_for_account(&account, &target).await?;
        driver
            .retrieve_user_query_logs(&account.username, from, to)
            .await
    }

    /// Provisions a JIT account on the session's asset.
    ///
    /// The broker-side row is inserted before the server-side grant; the
    /// insert rejects a second active JIT account per session, so it doubles
    /// as the provisioning claim. A failed grant unwinds the row.
    pub async fn create_account(&self, session: &Session) -> AppResult<AssetAccount> {
        let asset = self.require_asset(session).await?;
        let admin = self.admin_credentials(&asset).await?;
        let target = Self::resolve_target(session, &asset);
        let driver = self.driver_factory.connect(&asset, &admin, &target).await?;

        if !driver.supports_scope(session.scope()) {
            return Err(AppError::UnsupportedDbms(format!(
                "dbms '{}' cannot grant scope '{}'",
                asset.dbms.as_str(),
                session.scope().as_str()
            )));
        }

        let generated = self.generate_credentials(&asset).await?;
        let password_ciphertext = self.encryptor.encrypt(&generated.password)?;
        let expires_at = session.window().end();

        let account = self
            .accounts
            .insert_jit(NewAssetAccountInput {
                asset_id: asset.id,
                session_id: Some(session.id()),
                account_type: AccountType::Jit,
                username: generated.username.clone(),
                password_ciphertext,
                databases: target.named().to_vec(),
                scope: Some(session.scope()),
                expires_at: Some(expires_at),
            })
            .await?;

        if let Err(error) = driver
            .create_user(
                &generated.username,
                &generated.password,
                &target,
                session.scope(),
                expires_at,
            )
            .await
        {
            if let Err(delete_error) = self.accounts.delete(account.id).await {
                warn!(
                    account_id = %account.id,
                    %delete_error,
                    "failed to unwind account row after grant failure"
                );
            }
            return Err(error);
        }

        self.audit_repository
            .append_event(AuditEvent {
                org_id: session.org_id(),
                subject: session.user_id().to_string(),
                action: AuditAction::JitAccountCreated,
                resource_type: "asset_account".to_owned(),
                resource_id: account.id.to_string(),
                detail: Some(format!("session {}", session.id())),
            })
            .await?;

        Ok(account)
    }

    /// Tears down the session's JIT account best-effort: harvest query logs,
    /// drop the server account, retire the broker row. Failed steps are
    /// reported in the outcome, never as an error; a failed server drop
    /// leaves the row active so the expiry sweep retries it.
    pub async fn terminate_account(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> AppResult<TerminationOutcome> {
        let Some(account) = self.accounts.find_active_jit_for_session(session.id()).await? else {
            return Ok(TerminationOutcome::default());
        };

        Ok(self.teardown(&account, session, now).await)
    }

    /// Tears down every active JIT account whose expiry passed at or before
    /// `now`. Returns the number of accounts fully cleaned up; a second run
    /// over the same state returns zero.
    pub async fn cleanup_expired_accounts(&self, now: DateTime<Utc>, limit: u32) -> AppResult<u32> {
        let expired = self.accounts.list_expired_active_jit(now, limit).await?;
        let mut cleaned = 0;
        for account in expired {
            let Some(session_id) = account.session_id else {
                warn!(account_id = %account.id, "expired jit account has no owning session");
                continue;
            };

            let session = match self.sessions.find_by_id(session_id).await {
                Ok(Some(session)) => session,
                Ok(None) => {
                    warn!(account_id = %account.id, %session_id, "owning session not found");
                    continue;
                }
                Err(error) => {
                    warn!(account_id = %account.id, %error, "skipping expired jit account");
                    continue;
                }
            };

            let outcome = self.teardown(&account, &session, now).await;
            for error in &outcome.errors {
                warn!(account_id = %account.id, error, "expired account teardown step failed");
            }
            if outcome.terminated && outcome.account_deleted {
                cleaned += 1;
            }
        }

        Ok(cleaned)
    }

    async fn require_asset(&self, session: &Session) -> AppResult<Asset> {
        self.assets
            .find(session.org_id(), session.asset_id())
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("asset '{}' does not exist", session.asset_id()))
            })
    }

    async fn teardown(
        &self,
        account: &AssetAccount,
        session: &Session,
        now: DateTime<Utc>,
    ) -> TerminationOutcome {
        let mut outcome = TerminationOutcome::default();
        let target = DatabaseTarget::from_databases(&account.databases);

        let driver = match self.connect_for_account(account, &target).await {
            Ok(driver) => driver,
            Err(error) => {
                outcome.errors.push(format!("connect failed: {error}"));
                return outcome;
            }
        };

        self.harvest(&driver, account, session, now, &mut outcome).await;

        match driver.terminate_user(&account.username, &target).await {
            Ok(()) => outcome.terminated = true,
            Err(error) => outcome.errors.push(format!("terminate failed: {error}")),
        }

        if outcome.terminated {
            match self.accounts.deactivate(account.id, now).await {
                Ok(()) => outcome.account_deleted = true,
                Err(error) => outcome.errors.push(format!("deactivate failed: {error}")),
            }

            if let Err(error) = self
                .audit_repository
                .append_event(AuditEvent {
                    org_id: session.org_id(),
                    subject: "system".to_owned(),
                    action: AuditAction::JitAccountRevoked,
                    resource_type: "asset_account".to_owned(),
                    resource_id: account.id.to_string(),
                    detail: Some(format!("session {}", session.id())),
                })
                .await
            {
                outcome.errors.push(format!("audit append failed: {error}"));
            }
        }

        outcome
    }

    async fn connect_for_account(
        &self,
        account: &AssetAccount,
        target: &DatabaseTarget,
    ) -> AppResult<Arc<dyn DatabaseDriver>> {
        let asset = self
            .assets
            .find_by_id(account.asset_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("asset '{}' does not exist", account.asset_id))
            })?;
        let admin = self.admin_credentials(&asset).await?;
        self.driver_factory.connect(&asset, &admin, target).await
    }

    async fn harvest(
        &self,
        driver: &Arc<dyn DatabaseDriver>,
        account: &AssetAccount,
        session: &Session,
        now: DateTime<Utc>,
        outcome: &mut TerminationOutcome,
    ) {
        let from = session.started_at().unwrap_or_else(|| session.window().start());
        let records = match driver
            .retrieve_user_query_logs(&account.username, from, now)
            .await
        {
            Ok(records) => records,
            Err(error) => {
                outcome.errors.push(
                    AppError::AuditRetrievalDegraded(format!(
                        "query log harvest for '{}' failed: {error}",
                        account.username
                    ))
                    .to_string(),
                );
                return;
            }
        };

        let entries: Vec<SessionAuditEntry> = records
            .into_iter()
            .map(|record| SessionAuditEntry {
                org_id: session.org_id(),
                session_id: session.id(),
                request_id: session.request_id(),
                asset_id: session.asset_id(),
                user_id: session.user_id(),
                username: Some(account.username.clone()),
                query_text: record.query_text,
                query_timestamp: record.executed_at,
            })
            .collect();

        if let Err(error) = self.session_audit.append_entries(&entries).await {
            outcome
                .errors
                .push(format!("session audit persist failed: {error}"));
            return;
        }

        outcome.audit_logs_retrieved = true;
        outcome.audit_log_count = entries.len();
    }
}
