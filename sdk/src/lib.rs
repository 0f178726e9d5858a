//! Chorus SDK
//!
//! Shared contracts between the orchestration engine and the transport
//! adapters that drive the actual chat surfaces. Adapter authors only need
//! this crate: implement [`Transport`] and hand it to the engine.

/// Transport capability trait and element/selector types
pub mod transport;

/// Error types and handling
pub mod errors;

/// Session-level value types (turns, lifecycle states)
pub mod types;

// Re-export commonly used types
pub use errors::{AuthError, ChorusErrorExt, SessionError, SwarmError, TransportError};
pub use transport::{Cookie, ElementHandle, Locator, Selector, Transport};
pub use types::{Role, SessionState, Turn};
