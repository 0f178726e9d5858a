//! Error types and handling
//!
//! Errors are layered the way the swarm is layered: a [`TransportError`]
//! comes from the browser driver, an [`AuthError`] from the login flow,
//! a [`SessionError`] from one endpoint's lifecycle, and a [`SwarmError`]
//! from anything spanning several sessions. Every type implements
//! [`ChorusErrorExt`] so the CLI can show a hint instead of a raw message.
//!
//! Credentials never appear in any message. Authentication failures name
//! the failing step only.

use crate::types::SessionState;
use std::time::Duration;
use thiserror::Error;

/// Extra context attached to every Chorus error
pub trait ChorusErrorExt {
    /// Returns a short, user-facing hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether retrying the same operation can succeed
    ///
    /// Recoverable errors leave the session usable. Non-recoverable ones
    /// need the session (or the whole swarm) to be rebuilt.
    fn is_recoverable(&self) -> bool;
}

/// Failure reported by a [`Transport`](crate::Transport) implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    #[error("Driver protocol error: {0}")]
    Protocol(String),

    #[error("Driver connection failed: {0}")]
    Connection(String),

    #[error("Driver request timed out")]
    Timeout,

    /// The capability is not implemented by this transport
    #[error("Unsupported transport capability: {0}")]
    Unsupported(&'static str),
}

impl ChorusErrorExt for TransportError {
    fn user_hint(&self) -> &str {
        match self {
            Self::ElementNotFound(_) => "The page layout changed. The endpoint profile may need new selectors",
            Self::NotInteractable(_) => "The page is not accepting input. Check for an overlay or popup",
            Self::Protocol(_) => "The browser driver rejected a command",
            Self::Connection(_) => "Cannot reach the browser driver. Is it running?",
            Self::Timeout => "The browser driver took too long to answer",
            Self::Unsupported(_) => "This transport does not support the requested action",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Connection(_) | Self::Unsupported(_))
    }
}

/// Login flow failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing credentials: set {uname_var} and {pwd_var}")]
    MissingCredentials { uname_var: String, pwd_var: String },

    #[error("Username rejected by endpoint")]
    BadUsername,

    #[error("Password rejected by endpoint")]
    BadPassword,

    #[error("Account blocked by endpoint")]
    AccountBlocked,

    /// A required login step could not be performed
    #[error("Login flow broken at step {step}: {reason}")]
    FlowBroken { step: usize, reason: String },
}

impl ChorusErrorExt for AuthError {
    fn user_hint(&self) -> &str {
        match self {
            Self::MissingCredentials { .. } => "Export the credential variables or set skip_login",
            Self::BadUsername => "Check the configured username",
            Self::BadPassword => "Check the configured password",
            Self::AccountBlocked => "The account is blocked. Log in manually to resolve it",
            Self::FlowBroken { .. } => "The login page changed. The endpoint profile may need updating",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Failure of a single session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The transport for this session could not be created
    #[error("Session {tag} failed to start: {source}")]
    Bootstrap {
        tag: String,
        #[source]
        source: TransportError,
    },

    #[error("Bot challenge still present after {attempts} attempts")]
    Verification { attempts: u32 },

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("No response after {polls} polls")]
    NoResponse { polls: u32 },

    #[error("Operation not supported by this endpoint: {0}")]
    UnsupportedOperation(&'static str),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session not ready (state: {0})")]
    NotReady(SessionState),

    #[error("Nothing to regenerate: no prompt has been sent")]
    NothingToRegenerate,

    #[error("Prompt area never became interactive")]
    NotInteractive,

    #[error("Unknown endpoint kind: {0}")]
    UnknownKind(String),

    #[error("Unknown session tag: {0}")]
    UnknownTag(String),

    #[error("Operation timed out after {0:?}")]
    TimedOut(Duration),

    /// The worker driving this session died before reporting
    #[error("Session task aborted: {0}")]
    Aborted(String),
}

impl ChorusErrorExt for SessionError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Bootstrap { .. } => "Could not open a browser for this session. Check the webdriver settings",
            Self::Verification { .. } => "A bot challenge blocked the page. Try without headless mode",
            Self::Auth(e) => e.user_hint(),
            Self::NoResponse { .. } => "The endpoint did not answer. Try again",
            Self::UnsupportedOperation(_) => "This endpoint does not support that action",
            Self::Transport(e) => e.user_hint(),
            Self::NotReady(_) => "The session is not ready. Wait or reset it",
            Self::NothingToRegenerate => "Send a prompt before regenerating",
            Self::NotInteractive => "The chat input never appeared. The endpoint may be down",
            Self::UnknownKind(_) => "Run 'chorus kinds' to list the known endpoint kinds",
            Self::UnknownTag(_) => "Check the session tags in config.toml",
            Self::TimedOut(_) => "The session took too long and was marked failed",
            Self::Aborted(_) => "The session worker crashed. Check the logs",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::NoResponse { .. }
            | Self::UnsupportedOperation(_)
            | Self::NotReady(_)
            | Self::NothingToRegenerate
            | Self::TimedOut(_)
            | Self::UnknownTag(_) => true,
            Self::Transport(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

/// Failure of an operation that spans the swarm
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Conversation needs exactly 2 sessions, found {found}")]
    HeadCount { found: usize },

    #[error("Conversation has not been started")]
    ConversationNotStarted,

    #[error("Session {tag}: {source}")]
    Session {
        tag: String,
        #[source]
        source: SessionError,
    },

    #[error("Transcript error: {0}")]
    Transcript(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChorusErrorExt for SwarmError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::HeadCount { .. } => "Configure exactly two sessions for a conversation",
            Self::ConversationNotStarted => "Start the conversation before continuing it",
            Self::Session { source, .. } => source.user_hint(),
            Self::Transcript(_) => "Could not write the transcript. Check save_path",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::HeadCount { .. } => false,
            Self::Session { source, .. } => source.is_recoverable(),
            _ => true,
        }
    }
}
