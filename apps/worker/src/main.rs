//! Pamgate lifecycle sweeper runtime.
//!
//! Periodically expires overdue access requests, closes sessions whose
//! window lapsed, and revokes JIT accounts left past their expiry.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pamgate_application::{CredentialPolicy, RequestService, SecretsService, SessionService};
use pamgate_core::{AppError, AppResult};
use pamgate_infrastructure::{
    AesSecretEncryptor, PostgresAccountRepository, PostgresAssetRepository,
    PostgresAuditRepository, PostgresRequestRepository, PostgresSessionAuditRepository,
    PostgresSessionRepository, SqlxDriverFactory,
};

#[derive(Debug, Clone)]
struct WorkerConfig {
    database_url: String,
    encryption_key_hex: String,
    username_prefix: Option<String>,
    password_length: Option<usize>,
    sweep_interval_seconds: u64,
    sweep_batch_limit: u32,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;
    let (request_service, session_service, secrets_service) = build_services(&config, pool)?;

    info!(
        sweep_interval_seconds = config.sweep_interval_seconds,
        sweep_batch_limit = config.sweep_batch_limit,
        "pamgate-worker started"
    );

    loop {
        let now = Utc::now();

        match request_service
            .expire_overdue(now, config.sweep_batch_limit)
            .await
        {
            Ok(expired) if expired > 0 => {
                info!(expired, "expired overdue access requests");
            }
            Ok(_) => {}
            Err(error) => warn!(error = %error, "request expiry sweep failed"),
        }

        match session_service
            .expire_overdue(now, config.sweep_batch_limit)
            .await
        {
            Ok(expired) if expired > 0 => {
                info!(expired, "expired overdue sessions");
            }
            Ok(_) => {}
            Err(error) => warn!(error = %error, "session expiry sweep failed"),
        }

        match secrets_service
            .cleanup_expired_accounts(now, config.sweep_batch_limit)
            .await
        {
            Ok(cleaned) if cleaned > 0 => {
                info!(cleaned, "revoked expired jit accounts");
            }
            Ok(_) => {}
            Err(error) => warn!(error = %error, "jit account cleanup sweep failed"),
        }

        tokio::time::sleep(Duration::from_secs(config.sweep_interval_seconds)).await;
    }
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn build_services(
    config: &WorkerConfig,
    pool: PgPool,
) -> AppResult<(RequestService, SessionService, SecretsService)> {
    let requests = Arc::new(PostgresRequestRepository::new(pool.clone()));
    let sessions = Arc::new(PostgresSessionRepository::new(pool.clone()));
    let assets = Arc::new(PostgresAssetRepository::new(pool.clone()));
    let accounts = Arc::new(PostgresAccountRepository::new(pool.clone()));
    let session_audit = Arc::new(PostgresSessionAuditRepository::new(pool.clone()));
    let audit_repository = Arc::new(PostgresAuditRepository::new(pool));
    let encryptor = Arc::new(AesSecretEncryptor::from_hex(
        config.encryption_key_hex.as_str(),
    )?);
    let driver_factory = Arc::new(SqlxDriverFactory::new());

    let policy = match (config.username_prefix.clone(), config.password_length) {
        (None, None) => CredentialPolicy::default(),
        (prefix, length) => CredentialPolicy::new(
            prefix.unwrap_or_else(|| "pam".to_owned()),
            length.unwrap_or(16),
        )?,
    };

    let secrets_service = SecretsService::new(
        accounts,
        assets.clone(),
        sessions.clone(),
        session_audit,
        audit_repository.clone(),
        encryptor,
        driver_factory,
        policy,
    );
    let session_service = SessionService::new(
        sessions.clone(),
        audit_repository.clone(),
        secrets_service.clone(),
    );
    let request_service = RequestService::new(requests, sessions, assets, audit_repository);

    Ok((request_service, session_service, secrets_service))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let encryption_key_hex = required_env("PAM_ENCRYPTION_KEY")?;
        let username_prefix = env::var("PAM_USERNAME_PREFIX")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());
        let password_length = optional_env_usize("PAM_PASSWORD_LENGTH")?;
        let sweep_interval_seconds = parse_env_u64("SWEEP_INTERVAL_SECONDS", 60)?;
        let sweep_batch_limit = parse_env_u32("SWEEP_BATCH_LIMIT", 50)?;

        if sweep_interval_seconds == 0 {
            return Err(AppError::Validation(
                "SWEEP_INTERVAL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        if sweep_batch_limit == 0 {
            return Err(AppError::Validation(
                "SWEEP_BATCH_LIMIT must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            encryption_key_hex,
            username_prefix,
            password_length,
            sweep_interval_seconds,
            sweep_batch_limit,
        })
    }
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn optional_env_usize(name: &str) -> AppResult<Option<usize>> {
    match env::var(name) {
        Ok(value) => value
            .parse::<usize>()
            .map(Some)
            .map_err(|error| {
                AppError::Validation(format!("invalid {name} value '{value}': {error}"))
            }),
        Err(_) => Ok(None),
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
