use std::str::FromStr;

use pamgate_core::AppError;
use serde::{Deserialize, Serialize};

/// Risk tier attached to a request by an approver or an advisory source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRating {
    /// Routine access with no unusual indicators.
    Low,
    /// Elevated but acceptable risk.
    Medium,
    /// Risky access requiring extra scrutiny.
    High,
    /// Access that should almost always be denied.
    Critical,
}

impl RiskRating {
    /// Returns a stable storage value for this rating.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for RiskRating {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(AppError::Validation(format!(
                "unknown risk rating value '{value}'"
            ))),
        }
    }
}

/// Opaque advisory produced by an external risk evaluator at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAdvisory {
    /// Free-form evaluator note.
    pub note: String,
    /// Evaluator risk tier.
    pub rating: RiskRating,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::RiskRating;

    #[test]
    fn rating_roundtrip_storage_value() {
        let rating = RiskRating::Critical;
        let restored = RiskRating::from_str(rating.as_str());
        assert!(restored.is_ok());
        assert_eq!(restored.unwrap_or(RiskRating::Low), rating);
    }
}
