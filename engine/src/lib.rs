//! Chorus Engine Library
//!
//! This library drives a swarm of browser-based chat endpoints. It is used
//! by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Endpoint profiles and the kind catalog
pub mod profile;

/// Bounded polling primitive
pub mod wait;

/// Completion detection
pub mod reader;

/// Transport construction and the WebDriver transport
pub mod transport;

/// Session lifecycle
pub mod session;

/// Concurrent session construction and teardown
pub mod registry;

/// Multi-session operations
pub mod orchestrator;

/// Two-head conversations
pub mod conversation;

/// Transcript export
pub mod transcript;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
