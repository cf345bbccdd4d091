use std::str::FromStr;

use pamgate_core::AppError;
use serde::{Deserialize, Serialize};

/// Privilege tier requested for and granted to a JIT account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessScope {
    /// SELECT-only access on the target database(s).
    ReadOnly,
    /// SELECT/INSERT/UPDATE/DELETE access.
    ReadWrite,
    /// Data-manipulation access, equivalent to read-write.
    Dml,
    /// Schema-modification privileges in addition to DML.
    Ddl,
    /// Administrative grant scoped to the target database(s).
    All,
}

impl AccessScope {
    /// Returns a stable storage value for this scope.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::ReadWrite => "read_write",
            Self::Dml => "dml",
            Self::Ddl => "ddl",
            Self::All => "all",
        }
    }

    /// Returns the privilege ordering rank; broader scopes rank strictly higher.
    ///
    /// `ReadWrite` and `Dml` are the same tier.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::ReadOnly => 0,
            Self::ReadWrite | Self::Dml => 1,
            Self::Ddl => 2,
            Self::All => 3,
        }
    }

    /// Returns all known scopes.
    #[must_use]
    pub fn all_values() -> &'static [Self] {
        const ALL: &[AccessScope] = &[
            AccessScope::ReadOnly,
            AccessScope::ReadWrite,
            AccessScope::Dml,
            AccessScope::Ddl,
            AccessScope::All,
        ];

        ALL
    }
}

impl FromStr for AccessScope {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "read_only" => Ok(Self::ReadOnly),
            "read_write" => Ok(Self::ReadWrite),
            "dml" => Ok(Self::Dml),
            "ddl" => Ok(Self::Ddl),
            "all" => Ok(Self::All),
            _ => Err(AppError::Validation(format!(
                "unknown access scope value '{value}'"
            ))),
        }
    }
}
