//! Session value types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced a turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Prompt typed into the endpoint
    User,

    /// Output produced by the endpoint
    Agent,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Agent => write!(f, "agent"),
        }
    }
}

/// One entry of a session's history. Never mutated after it is appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,

    /// True when the content came from a regenerate request
    pub regenerated: bool,

    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            regenerated: false,
            content: content.into(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            regenerated: false,
            content: content.into(),
        }
    }

    pub fn regenerated(content: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            regenerated: true,
            content: content.into(),
        }
    }
}

/// Lifecycle state of a session
///
/// ```text
/// Uninitialized -> Loading -> Verifying -> Authenticating -> Ready <-> Busy
///        any state -> Failed          Ready | Failed -> Closed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Loading,
    Verifying,
    Authenticating,
    Ready,
    Busy,
    Failed,
    Closed,
}

impl SessionState {
    /// Whether the session can accept a new interaction
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    /// Whether the session is past its useful life
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Loading => "loading",
            SessionState::Verifying => "verifying",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}
