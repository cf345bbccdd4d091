//! Connects to target servers with admin credentials and hands out drivers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use pamgate_application::{AdminCredentials, DatabaseDriver, DatabaseTarget, DriverFactory};
use pamgate_core::{AppError, AppResult};
use pamgate_domain::{Asset, Dbms};

use crate::{MySqlTargetDriver, PostgresTargetDriver};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CONNECTIONS: u32 = 2;

/// Factory building per-asset drivers over short-lived sqlx pools.
#[derive(Clone, Default)]
pub struct SqlxDriverFactory;

impl SqlxDriverFactory {
    /// Creates the factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Picks the database the admin connection lands in: the first named target
/// database, or the engine's maintenance database for the all-databases
/// case. A named target with no databases is a configuration error.
fn connect_database<'a>(asset: &'a Asset, target: &'a DatabaseTarget) -> AppResult<&'a str> {
    match target {
        DatabaseTarget::AllDatabases => Ok(asset.dbms.maintenance_database()),
        DatabaseTarget::Named(databases) => {
            databases.first().map(String::as_str).ok_or_else(|| {
                AppError::DatabaseNotResolvable(format!(
                    "asset '{}' names no target database to connect to",
                    asset.name
                ))
            })
        }
    }
}

#[async_trait]
impl DriverFactory for SqlxDriverFactory {
    async fn connect(
        &self,
        asset: &Asset,
        credentials: &AdminCredentials,
        target: &DatabaseTarget,
    ) -> AppResult<Arc<dyn DatabaseDriver>> {
        let database = connect_database(asset, target)?;

        match asset.dbms {
            Dbms::MySql => {
                let options = MySqlConnectOptions::new()
                    .host(&asset.host)
                    .port(asset.port)
                    .username(&credentials.username)
                    .password(&credentials.password)
                    .database(database);

                let pool = MySqlPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(CONNECT_TIMEOUT)
                    .connect_with(options)
                    .await
                    .map_err(|error| {
                        AppError::DatabaseOperationFailed(format!(
                            "failed to connect to '{}': {error}",
                            asset.name
                        ))
                    })?;

                Ok(Arc::new(MySqlTargetDriver::new(pool)))
            }
            Dbms::PostgreSql => {
                let options = PgConnectOptions::new()
                    .host(&asset.host)
                    .port(asset.port)
                    .username(&credentials.username)
                    .password(&credentials.password)
                    .database(database);

                let pool = PgPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(CONNECT_TIMEOUT)
                    .connect_with(options.clone())
                    .await
                    .map_err(|error| {
                        AppError::DatabaseOperationFailed(format!(
                            "failed to connect to '{}': {error}",
                            asset.name
                        ))
                    })?;

                Ok(Arc::new(PostgresTargetDriver::new(pool, options)))
            }
        }
    }
}
