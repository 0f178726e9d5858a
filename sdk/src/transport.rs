//! Transport capability
//!
//! A [`Transport`] is the narrow set of browser actions a session needs:
//! load a page, find elements, click, type, read text and manage cookies.
//! The engine ships a W3C WebDriver implementation. Tests use in-memory
//! fakes.
//!
//! Methods take `&self`. A session serializes its own calls, so an
//! implementation only has to be safe to share, not reentrant.

use crate::errors::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Strategy used to resolve a [`Selector`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Locator {
    Xpath,
    Css,
    Id,
    Class,
    Tag,
}

/// Declarative element locator
///
/// In config files a selector is written as an inline table:
///
/// ```toml
/// prompt_area = { by = "xpath", query = "//textarea" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Selector {
    pub by: Locator,
    pub query: String,
}

impl Selector {
    pub fn new(by: Locator, query: impl Into<String>) -> Self {
        Self {
            by,
            query: query.into(),
        }
    }

    pub fn xpath(query: impl Into<String>) -> Self {
        Self::new(Locator::Xpath, query)
    }

    pub fn css(query: impl Into<String>) -> Self {
        Self::new(Locator::Css, query)
    }

    pub fn id(query: impl Into<String>) -> Self {
        Self::new(Locator::Id, query)
    }

    pub fn class(query: impl Into<String>) -> Self {
        Self::new(Locator::Class, query)
    }

    pub fn tag(query: impl Into<String>) -> Self {
        Self::new(Locator::Tag, query)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let by = match self.by {
            Locator::Xpath => "xpath",
            Locator::Css => "css",
            Locator::Id => "id",
            Locator::Class => "class",
            Locator::Tag => "tag",
        };
        write!(f, "{}={}", by, self.query)
    }
}

/// Opaque reference to an element found by a transport
///
/// Only meaningful to the transport that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Browser cookie injected before login
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }
}

/// Browser automation used by a session
#[async_trait]
pub trait Transport: Send + Sync {
    /// Load a URL in the current tab
    async fn navigate(&self, url: &str) -> Result<(), TransportError>;

    /// Find the first element matching `selector`, optionally inside `scope`
    ///
    /// Returns `Ok(None)` when nothing matches. Errors are reserved for
    /// driver failures.
    async fn locate(
        &self,
        selector: &Selector,
        scope: Option<&ElementHandle>,
    ) -> Result<Option<ElementHandle>, TransportError>;

    /// Find every element matching `selector`, in document order
    async fn locate_all(
        &self,
        selector: &Selector,
        scope: Option<&ElementHandle>,
    ) -> Result<Vec<ElementHandle>, TransportError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), TransportError>;

    /// Type text into an element without submitting it
    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), TransportError>;

    /// Type one line followed by a soft line break
    ///
    /// Used by endpoints where a bare newline would submit the prompt.
    async fn type_line(&self, element: &ElementHandle, line: &str) -> Result<(), TransportError>;

    /// Submit the content of an input element
    async fn submit(&self, element: &ElementHandle) -> Result<(), TransportError>;

    /// Visible text of an element
    async fn current_text(&self, element: &ElementHandle) -> Result<String, TransportError>;

    /// Whether at least one element matches `selector`
    async fn is_present(&self, selector: &Selector) -> Result<bool, TransportError> {
        Ok(self.locate(selector, None).await?.is_some())
    }

    async fn add_cookie(&self, cookie: &Cookie) -> Result<(), TransportError>;

    async fn remove_cookie(&self, name: &str) -> Result<(), TransportError>;

    /// Block until no element matches `selector`
    ///
    /// Returns `Ok(false)` if the element was still present after `timeout`.
    /// Transports without a native wait return [`TransportError::Unsupported`]
    /// and callers fall back to polling [`Transport::is_present`].
    async fn wait_until_absent(
        &self,
        _selector: &Selector,
        _timeout: Duration,
    ) -> Result<bool, TransportError> {
        Err(TransportError::Unsupported("wait_until_absent"))
    }

    /// Release the browser. Called at most once per session.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
