//! In-memory chat endpoint used by the integration tests
//!
//! [`FakeTransport`] simulates one chat page: a prompt area, a list of
//! answer bubbles that stream in over several reads, a busy indicator while
//! streaming, an optional bot challenge and a two-field login form. Every
//! transport call is logged so tests can assert on ordering.

#![allow(dead_code)]

use async_trait::async_trait;
use chorus_engine::config::{SessionOptions, SessionSpec};
use chorus_engine::profile::{
    AuthProbes, CompletionMode, Credential, EndpointProfile, LoginStep, ResetStrategy,
};
use chorus_engine::reader::StabilizationParams;
use chorus_engine::transport::TransportFactory;
use sdk::{Cookie, ElementHandle, Selector, Transport, TransportError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const PROMPT: &str = "#prompt";
pub const REPLY: &str = ".reply";
pub const STOP: &str = ".stop";
pub const CHALLENGE: &str = "#challenge";
pub const REGEN: &str = ".regen";
pub const USER_FIELD: &str = "#user";
pub const PASS_FIELD: &str = "#pass";
pub const BAD_PASS: &str = "#bad-pass";
pub const NEW_CHAT: &str = "#new-chat";

/// How a fake endpoint misbehaves
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// The factory refuses to open a transport
    pub fail_open: bool,
    /// Prompts are accepted but never answered
    pub silent: bool,
    /// Typing into the prompt area never returns
    pub hang: bool,
    /// Clicks needed before the challenge disappears, `u32::MAX` for never
    pub challenge_clicks: u32,
    /// The login form rejects the password
    pub bad_password: bool,
    /// Number of partial reads before an answer is complete
    pub stream_chunks: usize,
    /// The transport implements a blocking wait for absence
    pub blocking_wait: bool,
    /// Submitting a prompt loses the driver connection
    pub broken_submit: bool,
    /// The prompt area never shows up
    pub prompt_missing: bool,
}

#[derive(Debug)]
pub struct Bubble {
    chunks: Vec<String>,
    reads: usize,
}

impl Bubble {
    fn new(text: &str, parts: usize) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let parts = parts.max(1);
        let chunks = (1..=parts)
            .map(|k| {
                let end = (chars.len() * k).div_ceil(parts);
                chars[..end].iter().collect()
            })
            .collect();
        Self { chunks, reads: 0 }
    }

    fn streaming(&self) -> bool {
        self.reads + 1 < self.chunks.len()
    }

    fn advance(&mut self) {
        if self.streaming() {
            self.reads += 1;
        }
    }

    fn finish(&mut self) {
        self.reads = self.chunks.len() - 1;
    }

    fn read(&mut self) -> String {
        let text = self.chunks[self.reads.min(self.chunks.len() - 1)].clone();
        self.advance();
        text
    }

    pub fn full_text(&self) -> &str {
        self.chunks.last().map(String::as_str).unwrap_or("")
    }
}

/// Observable page state, shared between the transport and the test
#[derive(Debug, Default)]
pub struct ChatState {
    pub name: String,
    pub behavior: Behavior,
    pub calls: Vec<String>,
    pub bubbles: Vec<Bubble>,
    pub draft: String,
    pub submitted: Vec<String>,
    pub overlaps: u32,
    pub challenge_left: u32,
    pub credentials: (String, String),
    pub login_submitted: bool,
    pub cookies: Vec<String>,
    pub navigations: u32,
    pub closes: u32,
}

/// Answers like a very agreeable chatbot
///
/// `repeat: X` answers `X`. An aggregation prompt answers whether all
/// options agree. Anything else is echoed back with the endpoint name.
pub fn respond(name: &str, prompt: &str) -> String {
    if let Some(rest) = prompt.strip_prefix("repeat: ") {
        return rest.trim().to_string();
    }
    if let Some((_, options)) = prompt.split_once("Here are the options:\n") {
        let answers: Vec<&str> = options
            .split(" \n")
            .map(|line| line.split_once(": ").map_or(line, |(_, answer)| answer).trim())
            .collect();
        let agree = answers.windows(2).all(|w| w[0] == w[1]);
        return if agree {
            format!("yes, all {} answers agree", answers.len())
        } else {
            "no, the answers differ".to_string()
        };
    }
    format!("{} heard: {}", name, prompt)
}

#[derive(Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<ChatState>>,
}

impl FakeTransport {
    pub fn new(name: &str, behavior: Behavior) -> (Self, Arc<Mutex<ChatState>>) {
        let state = Arc::new(Mutex::new(ChatState {
            name: name.to_string(),
            challenge_left: behavior.challenge_clicks,
            behavior,
            ..Default::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }

    fn page(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap()
    }
}

fn handle(id: impl Into<String>) -> ElementHandle {
    ElementHandle::new(id)
}

fn find(page: &mut ChatState, selector: &Selector) -> Vec<ElementHandle> {
    match selector.query.as_str() {
        PROMPT if !page.behavior.prompt_missing => vec![handle("prompt")],
        REPLY => (0..page.bubbles.len()).map(|i| handle(format!("reply-{}", i))).collect(),
        STOP => match page.bubbles.last_mut() {
            Some(bubble) if bubble.streaming() => {
                bubble.advance();
                vec![handle("stop")]
            }
            _ => vec![],
        },
        CHALLENGE if page.challenge_left > 0 => vec![handle("challenge")],
        REGEN if !page.bubbles.is_empty() => vec![handle("regen")],
        USER_FIELD => vec![handle("user")],
        PASS_FIELD => vec![handle("pass")],
        BAD_PASS if page.behavior.bad_password && page.login_submitted => vec![handle("bad-pass")],
        NEW_CHAT => vec![handle("new-chat")],
        _ => vec![],
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn navigate(&self, url: &str) -> Result<(), TransportError> {
        let mut page = self.page();
        page.calls.push(format!("navigate {}", url));
        page.bubbles.clear();
        page.draft.clear();
        page.navigations += 1;
        Ok(())
    }

    async fn locate(
        &self,
        selector: &Selector,
        _scope: Option<&ElementHandle>,
    ) -> Result<Option<ElementHandle>, TransportError> {
        let mut page = self.page();
        Ok(find(&mut page, selector).into_iter().next())
    }

    async fn locate_all(
        &self,
        selector: &Selector,
        _scope: Option<&ElementHandle>,
    ) -> Result<Vec<ElementHandle>, TransportError> {
        let mut page = self.page();
        Ok(find(&mut page, selector))
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), TransportError> {
        let mut page = self.page();
        page.calls.push(format!("click {}", element.id()));
        match element.id() {
            "challenge" => {
                if page.challenge_left != u32::MAX {
                    page.challenge_left = page.challenge_left.saturating_sub(1);
                }
            }
            "regen" => {
                let chunks = page.behavior.stream_chunks;
                if let Some(last) = page.bubbles.pop() {
                    let again = format!("{} (regenerated)", last.full_text());
                    page.bubbles.push(Bubble::new(&again, chunks));
                }
            }
            "new-chat" => page.bubbles.clear(),
            _ => {}
        }
        Ok(())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), TransportError> {
        let hang = {
            let mut page = self.page();
            page.calls.push(format!("type {} {}", element.id(), text));
            match element.id() {
                "prompt" => {
                    if page.bubbles.last().is_some_and(Bubble::streaming) {
                        page.overlaps += 1;
                    }
                    page.draft.push_str(text);
                }
                "user" => page.credentials.0 = text.to_string(),
                "pass" => page.credentials.1 = text.to_string(),
                _ => {}
            }
            page.behavior.hang && element.id() == "prompt"
        };
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }

    async fn type_line(&self, element: &ElementHandle, line: &str) -> Result<(), TransportError> {
        let mut page = self.page();
        page.calls.push(format!("type_line {} {}", element.id(), line));
        page.draft.push_str(line);
        page.draft.push('\n');
        Ok(())
    }

    async fn submit(&self, element: &ElementHandle) -> Result<(), TransportError> {
        let mut page = self.page();
        page.calls.push(format!("submit {}", element.id()));
        match element.id() {
            "prompt" => {
                if page.behavior.broken_submit {
                    return Err(TransportError::Connection("browser went away".to_string()));
                }
                let prompt = std::mem::take(&mut page.draft);
                page.submitted.push(prompt.clone());
                if !page.behavior.silent {
                    let answer = respond(&page.name, &prompt);
                    let chunks = page.behavior.stream_chunks;
                    page.bubbles.push(Bubble::new(&answer, chunks));
                }
            }
            "pass" => page.login_submitted = true,
            _ => {}
        }
        Ok(())
    }

    async fn current_text(&self, element: &ElementHandle) -> Result<String, TransportError> {
        let mut page = self.page();
        let index = element
            .id()
            .strip_prefix("reply-")
            .and_then(|i| i.parse::<usize>().ok())
            .ok_or_else(|| TransportError::ElementNotFound(element.id().to_string()))?;
        let last = page.bubbles.len().saturating_sub(1);
        match page.bubbles.get_mut(index) {
            Some(bubble) if index == last => Ok(bubble.read()),
            Some(bubble) => Ok(bubble.full_text().to_string()),
            None => Err(TransportError::ElementNotFound(element.id().to_string())),
        }
    }

    async fn add_cookie(&self, cookie: &Cookie) -> Result<(), TransportError> {
        let mut page = self.page();
        page.calls.push(format!("cookie {}", cookie.name));
        page.cookies.push(cookie.name.clone());
        Ok(())
    }

    async fn remove_cookie(&self, name: &str) -> Result<(), TransportError> {
        let mut page = self.page();
        page.cookies.retain(|c| c != name);
        Ok(())
    }

    async fn wait_until_absent(&self, selector: &Selector, _timeout: Duration) -> Result<bool, TransportError> {
        let mut page = self.page();
        if !page.behavior.blocking_wait {
            return Err(TransportError::Unsupported("wait_until_absent"));
        }
        page.calls.push(format!("wait_absent {}", selector.query));
        if let Some(bubble) = page.bubbles.last_mut() {
            bubble.finish();
        }
        Ok(true)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut page = self.page();
        page.calls.push("close".to_string());
        page.closes += 1;
        Ok(())
    }
}

/// Opens fake transports, one behavior per tag
#[derive(Default)]
pub struct FakeFactory {
    behaviors: BTreeMap<String, Behavior>,
    pages: Mutex<BTreeMap<String, Arc<Mutex<ChatState>>>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tag: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(tag.to_string(), behavior);
        self
    }

    /// Page state of the transport opened for `tag`
    pub fn page(&self, tag: &str) -> Arc<Mutex<ChatState>> {
        let pages = self.pages.lock().unwrap();
        Arc::clone(pages.get(tag).expect("no transport opened for tag"))
    }

    pub fn opened(&self) -> Vec<String> {
        self.pages.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn open(
        &self,
        tag: &str,
        _profile: &EndpointProfile,
        _options: &SessionOptions,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let behavior = self.behaviors.get(tag).cloned().unwrap_or_default();
        if behavior.fail_open {
            return Err(TransportError::Connection(format!("no browser for {}", tag)));
        }
        let (transport, page) = FakeTransport::new(tag, behavior);
        self.pages.lock().unwrap().insert(tag.to_string(), page);
        Ok(Box::new(transport))
    }
}

/// Profile matching the fake page layout
pub fn fake_profile(name: &str) -> EndpointProfile {
    EndpointProfile {
        name: name.to_string(),
        url: format!("https://{}.example/chat", name.to_lowercase()),
        prompt_area: Selector::css(PROMPT),
        send_button: None,
        response: Selector::css(REPLY),
        busy: Some(Selector::css(STOP)),
        challenge: Some(Selector::css(CHALLENGE)),
        dismiss: vec![],
        cookies: vec![],
        login: vec![],
        auth_errors: AuthProbes::default(),
        reset: ResetStrategy::Navigate,
        regenerate: vec![Selector::css(REGEN)],
        completion: CompletionMode::PollTextStable,
        line_submission: false,
        stabilization: StabilizationParams {
            steps: 20,
            period_ms: 100,
            same_answer_limit: 3,
        },
    }
}

/// Profile with a username/password login form
pub fn login_profile(name: &str) -> EndpointProfile {
    EndpointProfile {
        login: vec![
            LoginStep::Fill {
                target: Selector::css(USER_FIELD),
                value: Credential::Username,
                submit: false,
            },
            LoginStep::Fill {
                target: Selector::css(PASS_FIELD),
                value: Credential::Password,
                submit: true,
            },
        ],
        auth_errors: AuthProbes {
            bad_password: Some(Selector::css(BAD_PASS)),
            ..Default::default()
        },
        ..fake_profile(name)
    }
}

pub fn spec(tag: &str, profile: EndpointProfile) -> SessionSpec {
    SessionSpec {
        tag: tag.to_string(),
        kind: profile.name.to_lowercase(),
        profile,
        options: SessionOptions {
            history: Some(true),
            ..Default::default()
        },
        timeout: Duration::from_secs(2),
    }
}

pub fn fake_spec(tag: &str) -> SessionSpec {
    spec(tag, fake_profile(tag))
}
