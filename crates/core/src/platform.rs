// SPDX-License-Identifier: MIT

//! Producer platform discriminant.

use serde::{Deserialize, Serialize};

/// The IDE integration an event originated from.
///
/// Drives raw-trace table partitioning (§3: `cursor_raw_traces` /
/// `claude_raw_traces`) and the session/conversation relationship rules
/// of §3 and §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    ClaudeCode,
    Cursor,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::ClaudeCode => "claude_code",
            Platform::Cursor => "cursor",
        }
    }

    /// Name of the raw-trace table this platform's events land in.
    pub fn raw_trace_table(&self) -> &'static str {
        match self {
            Platform::ClaudeCode => "claude_raw_traces",
            Platform::Cursor => "cursor_raw_traces",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude_code" => Ok(Platform::ClaudeCode),
            "cursor" => Ok(Platform::Cursor),
            other => Err(crate::error::ValidationError::UnknownPlatform(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn round_trips_through_str() {
        for p in [Platform::ClaudeCode, Platform::Cursor] {
            assert_eq!(Platform::from_str(p.as_str()).unwrap(), p);
        }
    }

    #[test]
    fn rejects_unknown_platform() {
        assert!(Platform::from_str("vscode").is_err());
    }
}
