// SPDX-License-Identifier: MIT

//! Closed set of event types producers may emit (§6).
//!
//! An unrecognized wire value is not represented here — the codec dead-letters
//! it with reason `schema_violation` before an `Event` is ever constructed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    SessionEnd,
    UserPrompt,
    AssistantResponse,
    ToolUse,
    Completion,
    CodeChange,
    AcceptanceDecision,
    Performance,
    DatabaseTrace,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        EventType::SessionStart,
        EventType::SessionEnd,
        EventType::UserPrompt,
        EventType::AssistantResponse,
        EventType::ToolUse,
        EventType::Completion,
        EventType::CodeChange,
        EventType::AcceptanceDecision,
        EventType::Performance,
        EventType::DatabaseTrace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionStart => "session_start",
            EventType::SessionEnd => "session_end",
            EventType::UserPrompt => "user_prompt",
            EventType::AssistantResponse => "assistant_response",
            EventType::ToolUse => "tool_use",
            EventType::Completion => "completion",
            EventType::CodeChange => "code_change",
            EventType::AcceptanceDecision => "acceptance_decision",
            EventType::Performance => "performance",
            EventType::DatabaseTrace => "database_trace",
        }
    }

    /// CDC dispatch priority, per §4.5: lower number is higher priority.
    pub fn priority(&self) -> u8 {
        match self {
            EventType::UserPrompt | EventType::AcceptanceDecision => 1,
            EventType::ToolUse | EventType::Completion => 2,
            EventType::Performance => 3,
            EventType::SessionStart | EventType::SessionEnd => 4,
            EventType::CodeChange | EventType::DatabaseTrace => 5,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| crate::error::ValidationError::UnknownEventType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn round_trips_every_variant() {
        for ty in EventType::ALL {
            assert_eq!(EventType::from_str(ty.as_str()).unwrap(), ty);
        }
    }

    #[test]
    fn priority_matches_spec_ordering() {
        assert!(EventType::UserPrompt.priority() < EventType::ToolUse.priority());
        assert!(EventType::ToolUse.priority() < EventType::Performance.priority());
        assert!(EventType::Performance.priority() < EventType::SessionStart.priority());
        assert!(EventType::SessionStart.priority() < EventType::CodeChange.priority());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(EventType::from_str("page_view").is_err());
    }
}
