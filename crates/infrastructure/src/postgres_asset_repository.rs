use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use pamgate_application::AssetRepository;
use pamgate_core::{AppError, AppResult, NonEmptyString, OrgId};
use pamgate_domain::{Asset, AssetId, Dbms};

/// PostgreSQL-backed repository for managed target assets.
#[derive(Clone)]
pub struct PostgresAssetRepository {
    pool: PgPool,
}

impl PostgresAssetRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct AssetRow {
    id: Uuid,
    org_id: Uuid,
    name: String,
    host: String,
    port: i32,
    dbms: String,
    default_databases: Vec<String>,
}

impl AssetRow {
    fn into_asset(self) -> AppResult<Asset> {
        let port = u16::try_from(self.port)
            .map_err(|_| AppError::Internal(format!("asset port {} out of range", self.port)))?;

        Ok(Asset {
            id: AssetId::from_uuid(self.id),
            org_id: OrgId::from_uuid(self.org_id),
            name: NonEmptyString::new(self.name)?,
            host: self.host,
            port,
            dbms: Dbms::from_str(&self.dbms)?,
            default_databases: self.default_databases,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        id,
        org_id,
        name,
        host,
        port,
        dbms,
        default_databases
    FROM assets
"#;

#[async_trait]
impl AssetRepository for PostgresAssetRepository {
    async fn find(&self, org_id: OrgId, id: AssetId) -> AppResult<Option<Asset>> {
        let row = sqlx::query_as::<_, AssetRow>(&format!(
            "{SELECT_COLUMNS} WHERE id = $1 AND org_id = $2"
        ))
        .bind(id.as_uuid())
        .bind(org_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to load asset: {error}")))?;

        row.map(AssetRow::into_asset).transpose()
    }

    async fn find_by_id(&self, id: AssetId) -> AppResult<Option<Asset>> {
        let row = sqlx::query_as::<_, AssetRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| AppError::Internal(format!("failed to load asset: {error}")))?;

        row.map(AssetRow::into_asset).transpose()
    }
}
