//! Risk classification for tool invocations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse severity classification for a tool call.
///
/// The ordering is meaningful: `Safe < Read < Write < Destructive <
/// Dangerous`. Audit sorting and the CEF severity mapping both rely on it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// No observable side effects.
    Safe,
    /// Reads data without modifying it.
    Read,
    /// Modifies data reversibly.
    #[default]
    Write,
    /// Destroys data (delete, drop, truncate).
    Destructive,
    /// Matched an explicit deny rule or a denied path.
    Dangerous,
}

impl RiskLevel {
    /// CEF severity for this risk level, on the 0-10 scale.
    #[must_use]
    pub fn cef_severity(self) -> u8 {
        match self {
            Self::Safe => 1,
            Self::Read => 3,
            Self::Write => 5,
            Self::Destructive => 8,
            Self::Dangerous => 10,
        }
    }

    /// Stable lowercase name, matching the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Read => "read",
            Self::Write => "write",
            Self::Destructive => "destructive",
            Self::Dangerous => "dangerous",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safe" => Ok(Self::Safe),
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "destructive" => Ok(Self::Destructive),
            "dangerous" => Ok(Self::Dangerous),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}
