//! W3C WebDriver transport
//!
//! Talks the WebDriver wire protocol over HTTP to an already running
//! chromedriver or geckodriver. Each [`WebDriverTransport`] owns one browser
//! session and deletes it on close.
//!
//! Selectors map onto the protocol's location strategies: `xpath`, `css
//! selector` and `tag name`. `id` and `class` selectors are rewritten as
//! CSS.

use super::TransportFactory;
use crate::config::{Browser, SessionOptions, WebDriverConfig};
use crate::profile::EndpointProfile;
use async_trait::async_trait;
use reqwest::{Client, Method};
use sdk::{Cookie, ElementHandle, Locator, Selector, Transport, TransportError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};

/// Key under which W3C drivers return element references
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Shift, Enter, then release all modifiers
const SOFT_LINE_BREAK: &str = "\u{E008}\u{E007}\u{E000}";

const ENTER: &str = "\u{E007}";

/// Opens browser sessions on a WebDriver endpoint
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    base_url: String,
    browser: Browser,
    client: Client,
}

impl WebDriverFactory {
    pub fn new(config: &WebDriverConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| TransportError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            browser: config.browser,
            client,
        })
    }

    /// Open a browser session without binding it to a profile
    pub async fn connect(&self, options: &SessionOptions) -> Result<WebDriverTransport, TransportError> {
        let body = json!({
            "capabilities": {
                "alwaysMatch": capabilities(self.browser, options),
            }
        });

        let url = format!("{}/session", self.base_url);
        let payload = send(&self.client, Method::POST, &url, Some(body), &self.base_url).await?;

        // W3C drivers nest the id in `value`, older ones put it next to it
        let session_id = payload["value"]
            .get("sessionId")
            .or_else(|| payload.get("sessionId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TransportError::Protocol("New session response has no sessionId".to_string()))?;

        tracing::debug!("WebDriver session {} created", session_id);
        Ok(WebDriverTransport {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            session_id,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl TransportFactory for WebDriverFactory {
    async fn open(
        &self,
        tag: &str,
        _profile: &EndpointProfile,
        options: &SessionOptions,
    ) -> Result<Box<dyn Transport>, TransportError> {
        tracing::info!("Opening browser for {}", tag);
        let transport = self.connect(options).await?;
        Ok(Box::new(transport))
    }
}

/// Browser capabilities for a new session
fn capabilities(browser: Browser, options: &SessionOptions) -> Value {
    let mut args: Vec<String> = Vec::new();
    match browser {
        Browser::Chrome => {
            if options.headless() {
                args.push("--headless=new".to_string());
            }
            if options.incognito() {
                args.push("--incognito".to_string());
            }
            if let Some(dir) = &options.user_data_dir {
                args.push(format!("--user-data-dir={}", dir.display()));
            }
        }
        Browser::Firefox => {
            if options.headless() {
                args.push("-headless".to_string());
            }
            if options.incognito() {
                args.push("-private".to_string());
            }
            if let Some(dir) = &options.user_data_dir {
                args.push("-profile".to_string());
                args.push(dir.display().to_string());
            }
        }
    }
    if let Some(extra) = &options.driver_arguments {
        args.extend(extra.iter().cloned());
    }

    match browser {
        Browser::Chrome => json!({
            "browserName": "chrome",
            "goog:chromeOptions": { "args": args },
        }),
        Browser::Firefox => json!({
            "browserName": "firefox",
            "moz:firefoxOptions": { "args": args },
        }),
    }
}

/// Location strategy and value for a selector
fn strategy(selector: &Selector) -> (&'static str, String) {
    match selector.by {
        Locator::Xpath => ("xpath", selector.query.clone()),
        Locator::Css => ("css selector", selector.query.clone()),
        Locator::Id => ("css selector", format!("[id=\"{}\"]", selector.query)),
        Locator::Class => ("css selector", format!(".{}", selector.query)),
        Locator::Tag => ("tag name", selector.query.clone()),
    }
}

/// Map a WebDriver error code to a transport error
fn map_wire_error(code: &str, message: &str) -> TransportError {
    match code {
        "no such element" | "stale element reference" => {
            TransportError::ElementNotFound(message.to_string())
        }
        "element not interactable" | "element click intercepted" | "invalid element state" => {
            TransportError::NotInteractable(message.to_string())
        }
        "timeout" | "script timeout" => TransportError::Timeout,
        "invalid session id" => TransportError::Connection(format!("{}: {}", code, message)),
        _ => TransportError::Protocol(format!("{}: {}", code, message)),
    }
}

/// Send one command and return the whole reply, mapping error replies
async fn send(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
    base_url: &str,
) -> Result<Value, TransportError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connection(format!(
                "Cannot connect to WebDriver at {}. Is the driver running?",
                base_url
            ))
        } else {
            TransportError::Protocol(e.to_string())
        }
    })?;

    let status = response.status();
    let payload: Value = response
        .json()
        .await
        .map_err(|e| TransportError::Protocol(format!("Failed to parse WebDriver response ({}): {}", status, e)))?;

    if !status.is_success() {
        let value = &payload["value"];
        let code = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
        return Err(map_wire_error(code, message));
    }

    Ok(payload)
}

fn element_id(value: &Value) -> Result<ElementHandle, TransportError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(ElementHandle::new)
        .ok_or_else(|| TransportError::Protocol(format!("Malformed element reference: {}", value)))
}

/// One browser session on a WebDriver endpoint
#[derive(Debug)]
pub struct WebDriverTransport {
    client: Client,
    base_url: String,
    session_id: String,
    closed: AtomicBool,
}

impl WebDriverTransport {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, TransportError> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        let mut payload = send(&self.client, method, &url, body, &self.base_url).await?;
        Ok(payload.get_mut("value").map(Value::take).unwrap_or(Value::Null))
    }

    fn find_path(scope: Option<&ElementHandle>, all: bool) -> String {
        let leaf = if all { "elements" } else { "element" };
        match scope {
            Some(element) => format!("/element/{}/{}", element.id(), leaf),
            None => format!("/{}", leaf),
        }
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<(), TransportError> {
        self.command(
            Method::POST,
            &format!("/element/{}/value", element.id()),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for WebDriverTransport {
    async fn navigate(&self, url: &str) -> Result<(), TransportError> {
        tracing::debug!("Navigating to {}", url);
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn locate(
        &self,
        selector: &Selector,
        scope: Option<&ElementHandle>,
    ) -> Result<Option<ElementHandle>, TransportError> {
        let (using, value) = strategy(selector);
        let result = self
            .command(
                Method::POST,
                &Self::find_path(scope, false),
                Some(json!({ "using": using, "value": value })),
            )
            .await;

        match result {
            Ok(value) => element_id(&value).map(Some),
            Err(TransportError::ElementNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn locate_all(
        &self,
        selector: &Selector,
        scope: Option<&ElementHandle>,
    ) -> Result<Vec<ElementHandle>, TransportError> {
        let (using, value) = strategy(selector);
        let value = self
            .command(
                Method::POST,
                &Self::find_path(scope, true),
                Some(json!({ "using": using, "value": value })),
            )
            .await?;

        value
            .as_array()
            .ok_or_else(|| TransportError::Protocol("Expected an element list".to_string()))?
            .iter()
            .map(element_id)
            .collect()
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), TransportError> {
        self.command(Method::POST, &format!("/element/{}/click", element.id()), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), TransportError> {
        self.send_keys(element, text).await
    }

    async fn type_line(&self, element: &ElementHandle, line: &str) -> Result<(), TransportError> {
        self.send_keys(element, &format!("{}{}", line, SOFT_LINE_BREAK)).await
    }

    async fn submit(&self, element: &ElementHandle) -> Result<(), TransportError> {
        self.send_keys(element, ENTER).await
    }

    async fn current_text(&self, element: &ElementHandle) -> Result<String, TransportError> {
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element.id()), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn add_cookie(&self, cookie: &Cookie) -> Result<(), TransportError> {
        self.command(Method::POST, "/cookie", Some(json!({ "cookie": cookie })))
            .await?;
        Ok(())
    }

    async fn remove_cookie(&self, name: &str) -> Result<(), TransportError> {
        self.command(Method::DELETE, &format!("/cookie/{}", name), None)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!("Deleting WebDriver session {}", self.session_id);
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        send(&self.client, Method::DELETE, &url, None, &self.base_url).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_strategy_mapping() {
        assert_eq!(
            strategy(&Selector::xpath("//textarea")),
            ("xpath", "//textarea".to_string())
        );
        assert_eq!(
            strategy(&Selector::id("password")),
            ("css selector", "[id=\"password\"]".to_string())
        );
        assert_eq!(
            strategy(&Selector::class("ProseMirror")),
            ("css selector", ".ProseMirror".to_string())
        );
        assert_eq!(
            strategy(&Selector::tag("message-content")),
            ("tag name", "message-content".to_string())
        );
    }

    #[test]
    fn test_wire_error_mapping() {
        assert!(matches!(
            map_wire_error("no such element", "nope"),
            TransportError::ElementNotFound(_)
        ));
        assert!(matches!(
            map_wire_error("element click intercepted", "overlay"),
            TransportError::NotInteractable(_)
        ));
        assert_eq!(map_wire_error("timeout", ""), TransportError::Timeout);
        assert!(matches!(
            map_wire_error("invalid session id", ""),
            TransportError::Connection(_)
        ));
        assert!(matches!(
            map_wire_error("javascript error", "x"),
            TransportError::Protocol(_)
        ));
    }

    #[test]
    fn test_chrome_capabilities() {
        let options = SessionOptions {
            headless: Some(true),
            incognito: Some(false),
            user_data_dir: Some(PathBuf::from("/tmp/profile")),
            driver_arguments: Some(vec!["--lang=en".to_string()]),
            ..Default::default()
        };

        let caps = capabilities(Browser::Chrome, &options);
        assert_eq!(caps["browserName"], "chrome");
        let args: Vec<&str> = caps["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(args, vec!["--headless=new", "--user-data-dir=/tmp/profile", "--lang=en"]);
    }

    #[test]
    fn test_firefox_capabilities() {
        let caps = capabilities(Browser::Firefox, &SessionOptions::default());
        assert_eq!(caps["browserName"], "firefox");
        assert_eq!(caps["moz:firefoxOptions"]["args"], json!(["-headless", "-private"]));
    }
}
