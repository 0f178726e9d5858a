//! Transport construction
//!
//! Sessions never build their own transport. A [`TransportFactory`] turns a
//! resolved profile and its options into a ready-to-use [`Transport`], which
//! keeps the session generic and lets tests inject in-memory fakes.

pub mod webdriver;

use crate::config::SessionOptions;
use crate::profile::EndpointProfile;
use async_trait::async_trait;
use sdk::{Transport, TransportError};

pub use webdriver::{WebDriverFactory, WebDriverTransport};

/// Opens one exclusive transport per session
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a fresh transport for the session `tag`
    async fn open(
        &self,
        tag: &str,
        profile: &EndpointProfile,
        options: &SessionOptions,
    ) -> Result<Box<dyn Transport>, TransportError>;
}
