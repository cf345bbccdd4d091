use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use pamgate_application::AccountRepository;
use pamgate_core::{AppError, AppResult};
use pamgate_domain::{
    AccessScope, AccountId, AccountType, AssetAccount, AssetId, NewAssetAccountInput, SessionId,
};

/// PostgreSQL-backed repository for credential rows on assets.
#[derive(Clone)]
pub struct PostgresAccountRepository {
    pool: PgPool,
}

impl PostgresAccountRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct AssetAccountRow {
    id: Uuid,
    asset_id: Uuid,
    session_id: Option<Uuid>,
    account_type: String,
    username: String,
    password_ciphertext: Vec<u8>,
    databases: Vec<String>,
    scope: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    ended_at: Option<DateTime<Utc>>,
}

impl AssetAccountRow {
    fn into_account(self) -> AppResult<AssetAccount> {
        let scope = self
            .scope
            .as_deref()
            .map(AccessScope::from_str)
            .transpose()?;

        Ok(AssetAccount {
            id: AccountId::from_uuid(self.id),
            asset_id: AssetId::from_uuid(self.asset_id),
            session_id: self.session_id.map(SessionId::from_uuid),
            account_type: AccountType::from_str(&self.account_type)?,
            username: self.username,
            password_ciphertext: self.password_ciphertext,
            databases: self.databases,
            scope,
            expires_at: self.expires_at,
            is_active: self.is_active,
            ended_at: self.ended_at,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        id,
        asset_id,
        session_id,
        account_type,
        username,
        password_ciphertext,
        databases,
        scope,
        expires_at,
        is_active,
        ended_at
    FROM asset_accounts
"#;

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn find_active_admin(&self, asset_id: AssetId) -> AppResult<Option<AssetAccount>> {
        let row = sqlx::query_as::<_, AssetAccountRow>(&format!(
            r#"
            {SELECT_COLUMNS}
            WHERE asset_id = $1 AND account_type = 'admin' AND is_active
            LIMIT 1
            "#
        ))
        .bind(asset_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to load admin account: {error}")))?;

        row.map(AssetAccountRow::into_account).transpose()
    }

    async fn find(&self, id: AccountId) -> AppResult<Option<AssetAccount>> {
        let row = sqlx::query_as::<_, AssetAccountRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| AppError::Internal(format!("failed to load account: {error}")))?;

        row.map(AssetAccountRow::into_account).transpose()
    }

    async fn find_active_jit_for_session(
        &self,
        session_id: SessionId,
    ) -> AppResult<Option<AssetAccount>> {
        let row = sqlx::query_as::<_, AssetAccountRow>(&format!(
            r#"
            {SELECT_COLUMNS}
            WHERE session_id = $1 AND account_type = 'jit' AND is_active
            LIMIT 1
            "#
        ))
        .bind(session_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to load jit account: {error}")))?;

        row.map(AssetAccountRow::into_account).transpose()
    }

    async fn insert_jit(&self, input: NewAssetAccountInput) -> AppResult<AssetAccount> {
        let id = AccountId::new();

        // The conditional insert is the session's provisioning claim: with a
        // partial unique index on (session_id) for active jit rows, exactly
        // one concurrent starter wins.
        let result = sqlx::query(
            r#"
            INSERT INTO asset_accounts (
                id,
                asset_id,
                session_id,
                account_type,
                username,
                password_ciphertext,
                databases,
                scope,
                expires_at,
                is_active
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE
            WHERE NOT EXISTS (
                SELECT 1
                FROM asset_accounts
                WHERE session_id = $3 AND account_type = 'jit' AND is_active
            )
            "#,
        )
        .bind(id.as_uuid())
        .bind(input.asset_id.as_uuid())
        .bind(input.session_id.map(|session_id| session_id.as_uuid()))
        .bind(input.account_type.as_str())
        .bind(&input.username)
        .bind(&input.password_ciphertext)
        .bind(&input.databases)
        .bind(input.scope.map(|scope| scope.as_str()))
        .bind(input.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to insert jit account: {error}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(
                "session already has an active jit account".to_owned(),
            ));
        }

        Ok(AssetAccount {
            id,
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
        })
    }

    async fn username_exists_active(&self, asset_id: AssetId, username: &str) -> AppResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM asset_accounts
                WHERE asset_id = $1 AND username = $2 AND is_active
            )
            "#,
        )
        .bind(asset_id.as_uuid())
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to check username: {error}")))?;

        Ok(exists)
    }

    async fn deactivate(&self, id: AccountId, ended_at: DateTime<Utc>) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE asset_accounts
            SET is_active = FALSE, ended_at = $2
            WHERE id = $1 AND is_active
            "#,
        )
        .bind(id.as_uuid())
        .bind(ended_at)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to deactivate account: {error}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "no active account '{id}' to deactivate"
            )));
        }

        Ok(())
    }

    async fn delete(&self, id: AccountId) -> AppResult<()> {
        sqlx::query("DELETE FROM asset_accounts WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|error| AppError::Internal(format!("failed to delete account: {error}")))?;

        Ok(())
    }

    async fn list_expired_active_jit(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> AppResult<Vec<AssetAccount>> {
        let rows = sqlx::query_as::<_, AssetAccountRow>(&format!(
            r#"
            {SELECT_COLUMNS}
            WHERE account_type = 'jit' AND is_active AND expires_at <= $1
            ORDER BY expires_at
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list expired jit accounts: {error}"))
        })?;

        rows.into_iter().map(AssetAccountRow::into_account).collect()
    }
}
