use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use pamgate_core::{Actor, AppError, AppResult, NonEmptyString, OrgId, UserId};
use pamgate_domain::{
    AccessRequest, AccessRequestInput, AccessScope, AccessWindow, AccountId, AccountType, Asset,
    AssetAccount, AssetId, AuditAction, Dbms, NewAssetAccountInput, QueryLogRecord, RequestId,
    RiskRating, Session, SessionAuditEntry, SessionId, SessionStatus,
};

use crate::audit_ports::{AuditEvent, AuditRepository};
use crate::secrets_ports::{
    AccountRepository, AdminCredentials, AssetRepository, DatabaseDriver, DatabaseTarget,
    DriverFactory, SecretEncryptor, SessionAuditRepository,
};
use crate::secrets_service::{CredentialPolicy, SecretsService};
use crate::session_ports::SessionRepository;

use super::SessionService;

#[derive(Default)]
struct FakeAuditRepository {
    events: Mutex<Vec<AuditEvent>>,
}

#[async_trait]
impl AuditRepository for FakeAuditRepository {
    async fn append_event(&self, event: AuditEvent) -> AppResult<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

#[derive(Default)]
struct FakeAccountRepository {
    accounts: Mutex<Vec<AssetAccount>>,
}

#[async_trait]
impl AccountRepository for FakeAccountRepository {
    async fn find_active_admin(&self, asset_id: AssetId) -> AppResult<Option<AssetAccount>> {
        Ok(self
            .accounts
            .lock()
            .await
            .iter()
            .find(|account| {
                account.asset_id == asset_id
                    && account.account_type == AccountType::Admin
                    && account.is_active
            })
            .cloned())
    }

    async fn find(&self, id: AccountId) -> AppResult<Option<AssetAccount>> {
        Ok(self
            .accounts
            .lock()
            .await
            .iter()
            .find(|account| account.id == id)
            .cloned())
    }

    async fn find_active_jit_for_session(
        &self,
        session_id: SessionId,
    ) -> AppResult<Option<AssetAccount>> {
        Ok(self
            .accounts
            .lock()
            .await
            .iter()
            .find(|account| {
                account.session_id == Some(session_id) && account.is_jit() && account.is_active
            })
            .cloned())
    }

    async fn insert_jit(&self, input: NewAssetAccountInput) -> AppResult<AssetAccount> {
        let mut accounts = self.accounts.lock().await;
        if accounts.iter().any(|account| {
            account.session_id == input.session_id && account.is_jit() && account.is_active
        }) {
            return Err(AppError::Conflict(
                "session already has an active jit account".to_owned(),
            ));
        }

        let account = AssetAccount {
            id: AccountId::new(),
            asset_id: input.asset_id,
            session_id: input.session_id,
            account_type: input.account_type,
            username: input.username,
            password_ciphertext: input.password_ciphertext,
            databases: input.databases,
            scope: input.scope,
            expires_at: input.expires_at,
            is_active: true,
            ended_at: None,
        };
        accounts.push(account.clone());
        Ok(account)
    }

    async fn username_exists_active(&self, asset_id: AssetId, username: &str) -> AppResult<bool> {
        Ok(self.accounts.lock().await.iter().any(|account| {
            account.asset_id == asset_id && account.username == username && account.is_active
        }))
    }

    async fn deactivate(&self, id: AccountId, ended_at: DateTime<Utc>) -> AppResult<()> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts
            .iter_mut()
            .find(|account| account.id == id)
            .ok_or_else(|| AppError::NotFound("account missing".to_owned()))?;
        account.is_active = false;
        account.ended_at = Some(ended_at);
        Ok(())
    }

    async fn delete(&self, id: AccountId) -> AppResult<()> {
        self.accounts.lock().await.retain(|account| account.id != id);
        Ok(())
    }

    async fn list_expired_active_jit(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> AppResult<Vec<AssetAccount>> {
        Ok(self
            .accounts
            .lock()
            .await
            .iter()
            .filter(|account| account.is_jit() && account.is_active && account.is_expired(now))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

struct FakeAssetRepository {
    assets: Vec<Asset>,
}

#[async_trait]
impl AssetRepository for FakeAssetRepository {
    async fn find(&self, org_id: OrgId, id: AssetId) -> AppResult<Option<Asset>> {
        Ok(self
            .assets
            .iter()
            .find(|asset| asset.id == id && asset.org_id == org_id)
            .cloned())
    }

    async fn find_by_id(&self, id: AssetId) -> AppResult<Option<Asset>> {
        Ok(self.assets.iter().find(|asset| asset.id == id).cloned())
    }
}

#[derive(Default)]
struct FakeSessionRepository {
    sessions: Mutex<Vec<Session>>,
}

#[async_trait]
impl SessionRepository for FakeSessionRepository {
    async fn create(&self, session: &Session) -> AppResult<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .iter()
            .any(|existing| existing.request_id() == session.request_id())
        {
            return Err(AppError::Conflict("session already exists".to_owned()));
        }

        sessions.push(session.clone());
        Ok(())
    }

    async fn find(&self, org_id: OrgId, id: SessionId) -> AppResult<Option<Session>> {
        Ok(self
            .sessions
            .lock()
            .await
            .iter()
            .find(|session| session.id() == id && session.org_id() == org_id)
            .cloned())
    }

    async fn find_by_id(&self, id: SessionId) -> AppResult<Option<Session>> {
        Ok(self
            .sessions
            .lock()
            .await
            .iter()
            .find(|session| session.id() == id)
            .cloned())
    }

    async fn find_by_request(
        &self,
        org_id: OrgId,
        request_id: RequestId,
    ) -> AppResult<Option<Session>> {
        Ok(self
            .sessions
            .lock()
            .await
            .iter()
            .find(|session| session.request_id() == request_id && session.org_id() == org_id)
            .cloned())
    }

    async fn persist_transition(
        &self,
        session: &Session,
        from_status: SessionStatus,
    ) -> AppResult<()> {
        let mut sessions = self.sessions.lock().await;
        let stored = sessions
            .iter_mut()
            .find(|stored| stored.id() == session.id())
            .ok_or_else(|| AppError::NotFound("session missing".to_owned()))?;
        if stored.status() != from_status {
            return Err(AppError::Conflict("session status moved".to_owned()));
        }

        *stored = session.clone();
        Ok(())
    }

    async fn list_overdue(&self, now: DateTime<Utc>, limit: u32) -> AppResult<Vec<Session>> {
        Ok(self
            .sessions
            .lock()
            .await
            .iter()
            .filter(|session| session.can_expire(now))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct FakeSessionAuditRepository {
    entries: Mutex<Vec<SessionAuditEntry>>,
}

#[async_trait]
impl SessionAuditRepository for FakeSessionAuditRepository {
    async fn append_entries(&self, entries: &[SessionAuditEntry]) -> AppResult<()> {
        self.entries.lock().await.extend_from_slice(entries);
        Ok(())
    }
}

struct PlainEncryptor;

impl SecretEncryptor for PlainEncryptor {
    fn encrypt(&self, plaintext: &str) -> AppResult<Vec<u8>> {
        Ok(plaintext.as_bytes().to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> AppResult<String> {
        String::from_utf8(ciphertext.to_vec())
            .map_err(|error| AppError::Internal(format!("bad ciphertext: {error}")))
    }
}

#[derive(Default)]
struct FakeDriver {
    created: Mutex<Vec<String>>,
    dropped: Mutex<Vec<String>>,
    fail_harvest: bool,
    logs: Vec<QueryLogRecord>,
}

#[async_trait]
impl DatabaseDriver for FakeDriver {
    async fn create_user(
        &self,
        username: &str,
        _password: &str,
        _target: &DatabaseTarget,
        _scope: AccessScope,
        _expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.created.lock().await.push(username.to_owned());
        Ok(())
    }

    async fn terminate_user(&self, username: &str, _target: &DatabaseTarget) -> AppResult<()> {
        self.dropped.lock().await.push(username.to_owned());
        Ok(())
    }

    async fn retrieve_user_query_logs(
        &self,
        _username: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> AppResult<Vec<QueryLogRecord>> {
        if self.fail_harvest {
            return Err(AppError::DatabaseOperationFailed(
                "query log table unavailable".to_owned(),
            ));
        }

        Ok(self.logs.clone())
    }

    fn supports_scope(&self, _scope: AccessScope) -> bool {
        true
    }

    async fn test_connection(&self) -> AppResult<()> {
        Ok(())
    }
}

struct FakeDriverFactory {
    driver: Arc<FakeDriver>,
}

#[async_trait]
impl DriverFactory for FakeDriverFactory {
    async fn connect(
        &self,
        _asset: &Asset,
        _credentials: &AdminCredentials,
        _target: &DatabaseTarget,
    ) -> AppResult<Arc<dyn DatabaseDriver>> {
        Ok(self.driver.clone())
    }
}

struct Harness {
    service: SessionService,
    sessions: Arc<FakeSessionRepository>,
    accounts: Arc<FakeAccountRepository>,
    audit: Arc<FakeAuditRepository>,
    driver: Arc<FakeDriver>,
    owner: Actor,
    asset: Asset,
}

struct HarnessConfig {
    with_admin: bool,
    driver: FakeDriver,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            with_admin: true,
            driver: FakeDriver {
                logs: vec![QueryLogRecord {
                    executed_at: Utc::now(),
                    query_text: "UPDATE orders SET state = 'shipped'".to_owned(),
                }],
                ..FakeDriver::default()
            },
        }
    }
}

async fn harness(config: HarnessConfig) -> Harness {
    let org_id = OrgId::new();
    let name = NonEmptyString::new("orders-db");
    assert!(name.is_ok());
    let asset = Asset {
        id: AssetId::new(),
        org_id,
        name: name.unwrap_or_else(|_| unreachable!()),
        host: "db.internal".to_owned(),
        port: 5432,
        dbms: Dbms::PostgreSql,
        default_databases: Vec::new(),
    };

    let accounts = Arc::new(FakeAccountRepository::default());
    if config.with_admin {
        accounts.accounts.lock().await.push(AssetAccount {
            id: AccountId::new(),
            asset_id: asset.id,
            session_id: None,
            account_type: AccountType::Admin,
            username: "postgres".to_owned(),
            password_ciphertext: b"s3cret-admin".to_vec(),
            databases: Vec::new(),
            scope: None,
            expires_at: None,
            is_active: true,
            ended_at: None,
        });
    }

    let sessions = Arc::new(FakeSessionRepository::default());
    let session_audit = Arc::new(FakeSessionAuditRepository::default());
    let audit = Arc::new(FakeAuditRepository::default());
    let driver = Arc::new(config.driver);
    let assets = Arc::new(FakeAssetRepository {
        assets: vec![asset.clone()],
    });

    let secrets = SecretsService::new(
        accounts.clone(),
        assets,
        sessions.clone(),
        session_audit,
        audit.clone(),
        Arc::new(PlainEncryptor),
        Arc::new(FakeDriverFactory {
            driver: driver.clone(),
        }),
        CredentialPolicy::default(),
    );
    let service = SessionService::new(sessions.clone(), audit.clone(), secrets);

    Harness {
        service,
        sessions,
        accounts,
        audit,
        driver,
        owner: Actor::new(UserId::new(), org_id),
        asset,
    }
}

async fn seed_session(harness: &Harness, window: AccessWindow) -> SessionId {
    let request = AccessRequest::new(AccessRequestInput {
        org_id: harness.asset.org_id,
        asset_id: harness.asset.id,
        requester_id: harness.owner.user_id(),
        scope: AccessScope::ReadWrite,
        databases: vec!["orders".to_owned()],
        window,
        reason: None,
    });
    assert!(request.is_ok());
    let mut request = request.unwrap_or_else(|_| unreachable!());
    assert!(request.submit(None).is_ok());
    assert!(
        request
            .approve(
                UserId::new(),
                "ok".to_owned(),
                RiskRating::Low,
                Utc::now()
            )
            .is_ok()
    );

    let session = Session::from_approved_request(&request);
    assert!(session.is_ok());
    let session = session.unwrap_or_else(|_| unreachable!());
    assert!(harness.sessions.create(&session).await.is_ok());
    session.id()
}

fn open_window() -> AccessWindow {
    let now = Utc::now();
    let window = AccessWindow::new(now - Duration::minutes(5), now + Duration::hours(2));
    assert!(window.is_ok());
    window.unwrap_or_else(|_| unreachable!())
}

fn future_window() -> AccessWindow {
    let now = Utc::now();
    let window = AccessWindow::new(now + Duration::hours(1), now + Duration::hours(3));
    assert!(window.is_ok());
    window.unwrap_or_else(|_| unreachable!())
}

#[tokio::test]
async fn start_provisions_account_and_activates() {
    let harness = harness(HarnessConfig::default()).await;
    let id = seed_session(&harness, open_window()).await;

    let started = harness.service.start(&harness.owner, id).await;
    assert!(started.is_ok());

    let started = started.unwrap_or_else(|_| unreachable!());
    assert_eq!(started.status(), SessionStatus::Active);
    assert!(started.started_at().is_some());

    let created = harness.driver.created.lock().await;
    assert_eq!(created.len(), 1);
    drop(created);

    let accounts = harness.accounts.accounts.lock().await;
    assert!(
        accounts
            .iter()
            .any(|account| account.session_id == Some(id) && account.is_active)
    );
    drop(accounts);

    let events = harness.audit.events.lock().await;
    assert!(
        events
            .iter()
            .any(|event| event.action == AuditAction::SessionStarted)
    );
}

#[tokio::test]
async fn start_by_non_owner_is_forbidden() {
    let harness = harness(HarnessConfig::default()).await;
    let id = seed_session(&harness, open_window()).await;

    let other = Actor::new(UserId::new(), harness.owner.org_id());
    let result = harness.service.start(&other, id).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn start_outside_window_is_rejected() {
    let harness = harness(HarnessConfig::default()).await;
    let id = seed_session(&harness, future_window()).await;

    let result = harness.service.start(&harness.owner, id).await;
    assert!(matches!(result, Err(AppError::InvalidTransition(_))));

    let created = harness.driver.created.lock().await;
    assert!(created.is_empty());
}

#[tokio::test]
async fn start_without_admin_account_leaves_session_scheduled() {
    let harness = harness(HarnessConfig {
        with_admin: false,
        ..HarnessConfig::default()
    })
    .await;
    let id = seed_session(&harness, open_window()).await;

    let result = harness.service.start(&harness.owner, id).await;
    assert!(matches!(result, Err(AppError::NoActiveAdminAccount(_))));

    let stored = harness.sessions.find_by_id(id).await;
    assert!(
        stored
            .unwrap_or_default()
            .is_some_and(|session| session.status() == SessionStatus::Scheduled)
    );
}

#[tokio::test]
async fn start_conflicts_when_account_already_claimed() {
    let harness = harness(HarnessConfig::default()).await;
    let id = seed_session(&harness, open_window()).await;

    let claimed = harness
        .accounts
        .insert_jit(NewAssetAccountInput {
            asset_id: harness.asset.id,
            session_id: Some(id),
            account_type: AccountType::Jit,
            username: "pam001_abcde".to_owned(),
            password_ciphertext: b"x".to_vec(),
            databases: Vec::new(),
            scope: Some(AccessScope::ReadWrite),
            expires_at: Some(Utc::now() + Duration::hours(2)),
        })
        .await;
    assert!(claimed.is_ok());

    let result = harness.service.start(&harness.owner, id).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    let stored = harness.sessions.find_by_id(id).await;
    assert!(
        stored
            .unwrap_or_default()
            .is_some_and(|session| session.status() == SessionStatus::Scheduled)
    );
}

#[tokio::test]
async fn end_tears_down_account_and_closes_session() {
    let harness = harness(HarnessConfig::default()).await;
    let id = seed_session(&harness, open_window()).await;
    assert!(harness.service.start(&harness.owner, id).await.is_ok());

    let ended = harness.service.end(&harness.owner, id).await;
    assert!(ended.is_ok());

    let (session, outcome) = ended.unwrap_or_else(|_| unreachable!());
    assert_eq!(session.status(), SessionStatus::Ended);
    assert!(!session.is_terminated());
    assert!(outcome.terminated);
    assert!(outcome.audit_logs_retrieved);
    assert!(outcome.account_deleted);
    assert_eq!(outcome.audit_log_count, 1);

    let dropped = harness.driver.dropped.lock().await;
    assert_eq!(dropped.len(), 1);
    drop(dropped);

    let accounts = harness.accounts.accounts.lock().await;
    assert!(
        accounts
            .iter()
            .all(|account| !account.is_jit() || !account.is_active)
    );
}

#[tokio::test]
async fn end_with_degraded_harvest_still_closes() {
    let harness = harness(HarnessConfig {
        driver: FakeDriver {
            fail_harvest: true,
            ..FakeDriver::default()
        },
        ..HarnessConfig::default()
    })
    .await;
    let id = seed_session(&harness, open_window()).await;
    assert!(harness.service.start(&harness.owner, id).await.is_ok());

    let ended = harness.service.end(&harness.owner, id).await;
    assert!(ended.is_ok());

    let (session, outcome) = ended.unwrap_or_else(|_| unreachable!());
    assert_eq!(session.status(), SessionStatus::Ended);
    assert!(outcome.terminated);
    assert!(!outcome.audit_logs_retrieved);
    assert!(!outcome.errors.is_empty());
}

#[tokio::test]
async fn terminate_force_closes_and_flags() {
    let harness = harness(HarnessConfig::default()).await;
    let id = seed_session(&harness, open_window()).await;
    assert!(harness.service.start(&harness.owner, id).await.is_ok());

    let operator = Actor::new(UserId::new(), harness.owner.org_id());
    let terminated = harness.service.terminate(&operator, id).await;
    assert!(terminated.is_ok());

    let (session, outcome) = terminated.unwrap_or_else(|_| unreachable!());
    assert_eq!(session.status(), SessionStatus::Terminated);
    assert!(session.is_terminated());
    assert!(outcome.terminated);

    let events = harness.audit.events.lock().await;
    assert!(
        events
            .iter()
            .any(|event| event.action == AuditAction::SessionTerminated)
    );
}

#[tokio::test]
async fn cancel_scheduled_session() {
    let harness = harness(HarnessConfig::default()).await;
    let id = seed_session(&harness, future_window()).await;

    let cancelled = harness.service.cancel(&harness.owner, id).await;
    assert!(cancelled.is_ok());
    assert_eq!(
        cancelled
            .map(|session| session.status())
            .unwrap_or(SessionStatus::Scheduled),
        SessionStatus::Cancelled
    );
}

#[tokio::test]
async fn check_in_requires_active_session() {
    let harness = harness(HarnessConfig::default()).await;
    let id = seed_session(&harness, open_window()).await;

    let result = harness.service.check_in(&harness.owner, id).await;
    assert!(matches!(result, Err(AppError::InvalidTransition(_))));

    assert!(harness.service.start(&harness.owner, id).await.is_ok());
    assert!(harness.service.check_in(&harness.owner, id).await.is_ok());
}

#[tokio::test]
async fn expire_overdue_sweeps_scheduled_and_active() {
    let harness = harness(HarnessConfig::default()).await;
    let scheduled_id = seed_session(&harness, open_window()).await;
    let active_id = seed_session(&harness, open_window()).await;
    assert!(harness.service.start(&harness.owner, active_id).await.is_ok());

    let after_window = Utc::now() + Duration::days(1);
    let expired = harness.service.expire_overdue(after_window, 50).await;
    assert!(expired.is_ok());
    assert_eq!(expired.unwrap_or_default(), 2);

    for id in [scheduled_id, active_id] {
        let stored = harness.sessions.find_by_id(id).await;
        assert!(
            stored
                .unwrap_or_default()
                .is_some_and(|session| session.status() == SessionStatus::Expired)
        );
    }

    // The live session's account was torn down during the sweep.
    let dropped = harness.driver.dropped.lock().await;
    assert_eq!(dropped.len(), 1);
    drop(dropped);

    let second = harness.service.expire_overdue(after_window, 50).await;
    assert!(second.is_ok());
    assert_eq!(second.unwrap_or_default(), 0);
}
