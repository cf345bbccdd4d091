use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use pamgate_core::{AppError, NonEmptyString, OrgId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scope::AccessScope;
use crate::session::SessionId;

/// Asset identifier for a managed target database server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(Uuid);

impl AssetId {
    /// Creates a random asset identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an asset identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for AssetId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Identifier of an account row on an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Creates a random account identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an account identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for AccountId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Database engine running on an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dbms {
    /// MySQL or a compatible fork.
    MySql,
    /// PostgreSQL.
    PostgreSql,
}

impl Dbms {
    /// Returns a stable storage value for this engine.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::PostgreSql => "postgresql",
        }
    }

    /// Returns the engine's conventional port.
    #[must_use]
    pub fn default_port(&self) -> u16 {
        match self {
            Self::MySql => 3306,
            Self::PostgreSql => 5432,
        }
    }

    /// Returns the maintenance database used to connect when no target
    /// database is named (the "all databases" case).
    #[must_use]
    pub fn maintenance_database(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::PostgreSql => "postgres",
        }
    }
}

impl FromStr for Dbms {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mysql" => Ok(Self::MySql),
            "postgresql" => Ok(Self::PostgreSql),
            _ => Err(AppError::UnsupportedDbms(format!(
                "no driver registered for dbms '{value}'"
            ))),
        }
    }
}

/// A target database server managed by the broker.
///
/// Immutable for the lifetime of any session against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Asset identifier.
    pub id: AssetId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Human-readable asset name.
    pub name: NonEmptyString,
    /// Server hostname or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database engine.
    pub dbms: Dbms,
    /// Default target databases; empty means all databases.
    pub default_databases: Vec<String>,
}

/// Whether an account is the long-lived admin credential or an ephemeral grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Long-lived credential able to create and drop other accounts.
    Admin,
    /// Ephemeral just-in-time credential bound to one session.
    Jit,
}

impl AccountType {
    /// Returns a stable storage value for this account type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Jit => "jit",
        }
    }
}

impl FromStr for AccountType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Self::Admin),
            "jit" => Ok(Self::Jit),
            _ => Err(AppError::Validation(format!(
                "unknown account type value '{value}'"
            ))),
        }
    }
}

/// A credential row on an asset, admin or JIT.
///
/// The password is always held as ciphertext; decryption happens only at the
/// provisioning boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAccount {
    /// Account identifier.
    pub id: AccountId,
    /// Asset this account lives on.
    pub asset_id: AssetId,
    /// Owning session for JIT accounts; `None` for admin accounts.
    pub session_id: Option<SessionId>,
    /// Admin or JIT.
    pub account_type: AccountType,
    /// Database username.
    pub username: String,
    /// Encrypted password bytes.
    pub password_ciphertext: Vec<u8>,
    /// Databases the account was granted on; empty means all databases.
    pub databases: Vec<String>,
    /// Granted scope for JIT accounts.
    pub scope: Option<AccessScope>,
    /// Hard expiry; never later than the owning session's scheduled end.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the account is currently live.
    pub is_active: bool,
    /// When the account was retired.
    pub ended_at: Option<DateTime<Utc>>,
}

impl AssetAccount {
    /// Returns whether this is an ephemeral JIT account.
    #[must_use]
    pub fn is_jit(&self) -> bool {
        self.account_type == AccountType::Jit
    }

    /// Returns whether the account's expiry has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Input for persisting a newly provisioned account row.
#[derive(Debug, Clone)]
pub struct NewAssetAccountInput {
    /// Asset the account lives on.
    pub asset_id: AssetId,
    /// Owning session for JIT accounts.
    pub session_id: Option<SessionId>,
    /// Admin or JIT.
    pub account_type: AccountType,
    /// Database username.
    pub username: String,
    /// Encrypted password bytes.
    pub password_ciphertext: Vec<u8>,
    /// Databases the account was granted on; empty means all databases.
    pub databases: Vec<String>,
    /// Granted scope.
    pub scope: Option<AccessScope>,
    /// Hard expiry.
    pub expires_at: Option<DateTime<Utc>>,
}
