//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod aes_secret_encryptor;
mod mysql_target_driver;
mod postgres_account_repository;
mod postgres_asset_repository;
mod postgres_audit_repository;
mod postgres_request_repository;
mod postgres_session_audit_repository;
mod postgres_session_repository;
mod postgres_target_driver;
mod sqlx_driver_factory;

pub use aes_secret_encryptor::AesSecretEncryptor;
pub use mysql_target_driver::MySqlTargetDriver;
pub use postgres_account_repository::PostgresAccountRepository;
pub use postgres_asset_repository::PostgresAssetRepository;
pub use postgres_audit_repository::PostgresAuditRepository;
pub use postgres_request_repository::PostgresRequestRepository;
pub use postgres_session_audit_repository::PostgresSessionAuditRepository;
pub use postgres_session_repository::PostgresSessionRepository;
pub use postgres_target_driver::PostgresTargetDriver;
pub use sqlx_driver_factory::SqlxDriverFactory;
