//! Session lifecycle
//!
//! A [`Session`] binds one endpoint profile to one exclusively owned
//! transport and walks it through its lifecycle:
//!
//! ```text
//! Uninitialized -> Loading -> Verifying -> Authenticating -> Ready <-> Busy
//! ```
//!
//! Any unrecoverable transport fault moves the session to `Failed`.
//! `close` moves any state to `Closed` and releases the transport.
//!
//! Session methods take `&mut self`, so a session is driven by one caller at
//! a time. [`SessionHandle`] shares a session between tasks and serializes
//! access to it.

mod handle;
mod login;

pub use handle::SessionHandle;
pub(crate) use login::resolve_credentials;

use crate::config::{SessionOptions, SessionSpec};
use crate::profile::{Capabilities, CompletionMode, EndpointProfile, ResetStrategy};
use crate::reader::{wait_affordance_gone, OutputProbe, StabilizingReader};
use crate::telemetry::session_span;
use crate::transcript::{default_file_name, Transcript};
use crate::transport::TransportFactory;
use crate::wait::RetryWaiter;
use async_trait::async_trait;
use sdk::{
    ChorusErrorExt, ElementHandle, Selector, SessionError, SessionState, Transport, TransportError,
    Turn,
};
use std::time::Duration;
use tokio::time::sleep;
use tracing::Instrument;

/// Interval between two lookups while waiting for an element
pub const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Bounded retry loop used to get past an anti-automation challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff: Duration::from_secs(1),
        }
    }
}

/// One stateful endpoint binding
pub struct Session {
    tag: String,
    kind: String,
    profile: EndpointProfile,
    options: SessionOptions,
    timeout: Duration,
    verify: VerifyPolicy,
    reader: StabilizingReader,
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    last_prompt: Option<String>,
    interim_output: String,
    history: Vec<Turn>,
    span: tracing::Span,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("turns", &self.history.len())
            .finish()
    }
}

impl Session {
    /// Bind a spec to a transport. The session starts `Uninitialized`.
    pub fn new(spec: SessionSpec, transport: Box<dyn Transport>) -> Self {
        let span = session_span(&spec.tag, &spec.kind);
        let reader = StabilizingReader::new(spec.profile.stabilization);
        Self {
            tag: spec.tag,
            kind: spec.kind,
            profile: spec.profile,
            options: spec.options,
            timeout: spec.timeout,
            verify: VerifyPolicy::default(),
            reader,
            transport: Some(transport),
            state: SessionState::Uninitialized,
            last_prompt: None,
            interim_output: String::new(),
            history: Vec::new(),
            span,
        }
    }

    /// Log under `span` instead of the default `session{tag, kind}` span
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Replace the verification retry policy
    pub fn with_verify_policy(mut self, verify: VerifyPolicy) -> Self {
        self.verify = verify;
        self
    }

    /// Open a transport through `factory` and bring the session to `Ready`
    ///
    /// A session that fails to open is closed before the error is returned,
    /// so its transport is always released.
    pub async fn connect(spec: SessionSpec, factory: &dyn TransportFactory) -> Result<Self, SessionError> {
        let tag = spec.tag.clone();
        let transport = factory
            .open(&spec.tag, &spec.profile, &spec.options)
            .await
            .map_err(|source| SessionError::Bootstrap {
                tag: tag.clone(),
                source,
            })?;

        let mut session = Session::new(spec, transport);
        if let Err(e) = session.open().await {
            if let Err(close_err) = session.close().await {
                tracing::warn!("Failed to release transport of {}: {}", tag, close_err);
            }
            return Err(e);
        }
        Ok(session)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn profile(&self) -> &EndpointProfile {
        &self.profile
    }

    pub fn capabilities(&self) -> Capabilities {
        self.profile.capabilities()
    }

    /// Recorded turns, oldest first. Empty unless history is enabled.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn last_prompt(&self) -> Option<&str> {
        self.last_prompt.as_deref()
    }

    /// Latest partial or final output seen while waiting for an answer
    pub fn interim_output(&self) -> &str {
        &self.interim_output
    }

    pub(crate) fn mark_failed(&mut self) {
        if self.state != SessionState::Closed {
            tracing::warn!(parent: &self.span, "Session marked failed");
            self.state = SessionState::Failed;
        }
    }

    /// Run the startup sequence: load, verify, authenticate, wait for input
    pub async fn open(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Uninitialized {
            return Err(SessionError::NotReady(self.state));
        }

        let span = self.span.clone();
        let result = self.bootstrap().instrument(span).await;
        match &result {
            Ok(()) => tracing::info!(parent: &self.span, "{} is ready to interact", self.tag),
            Err(e) => {
                tracing::error!(parent: &self.span, "Startup failed in state {}: {}", self.state, e);
                self.state = SessionState::Failed;
            }
        }
        result
    }

    async fn bootstrap(&mut self) -> Result<(), SessionError> {
        let credentials = login::resolve_credentials(&self.profile, &self.options)?;

        self.state = SessionState::Loading;
        self.load().await?;

        self.state = SessionState::Verifying;
        self.pass_verification().await?;

        self.state = SessionState::Authenticating;
        if let Some(credentials) = credentials {
            let transport = self.live_transport()?;
            login::run(transport, &self.profile, &credentials, self.timeout).await?;
        } else {
            tracing::debug!("Login skipped");
        }

        let transport = self.live_transport()?;
        if wait_for(transport, &self.profile.prompt_area, self.timeout).await?.is_none() {
            return Err(SessionError::NotInteractive);
        }

        self.state = SessionState::Ready;
        Ok(())
    }

    async fn load(&mut self) -> Result<(), SessionError> {
        let transport = self.live_transport()?;
        tracing::info!("Opening {}", self.profile.url);
        transport.navigate(&self.profile.url).await?;

        let cookies: Vec<_> = self
            .profile
            .cookies
            .iter()
            .chain(self.options.cookies.iter().flatten())
            .collect();
        if !cookies.is_empty() {
            for cookie in cookies {
                transport.add_cookie(cookie).await?;
            }
            transport.navigate(&self.profile.url).await?;
        }

        for popup in &self.profile.dismiss {
            click_if_present(transport, popup).await?;
        }
        Ok(())
    }

    async fn pass_verification(&mut self) -> Result<(), SessionError> {
        let Some(challenge) = &self.profile.challenge else {
            return Ok(());
        };
        let transport = self.live_transport()?;

        for _ in 0..self.verify.attempts {
            let Some(button) = transport.locate(challenge, None).await? else {
                return Ok(());
            };
            match transport.click(&button).await {
                Ok(()) => tracing::info!("Clicked verification button"),
                Err(TransportError::NotInteractable(_)) => {
                    tracing::info!("Verification button is not clickable yet")
                }
                Err(e) => return Err(e.into()),
            }
            sleep(self.verify.backoff).await;
        }

        Err(SessionError::Verification {
            attempts: self.verify.attempts,
        })
    }

    /// Send a prompt and wait for the complete answer
    pub async fn send(&mut self, prompt: &str) -> Result<String, SessionError> {
        self.ensure_ready()?;
        self.state = SessionState::Busy;

        let span = self.span.clone();
        let result = self.send_inner(prompt).instrument(span).await;
        self.settle(&result);

        if let Ok(response) = &result {
            self.last_prompt = Some(prompt.to_string());
            if self.options.history() {
                self.history.push(Turn::user(prompt));
                self.history.push(Turn::agent(response.clone()));
            }
        }
        result
    }

    async fn send_inner(&mut self, prompt: &str) -> Result<String, SessionError> {
        let baseline = {
            let transport = self.live_transport()?;
            let baseline = transport.locate_all(&self.profile.response, None).await?.len();

            let area = wait_for(transport, &self.profile.prompt_area, self.timeout)
                .await?
                .ok_or_else(|| TransportError::ElementNotFound(self.profile.prompt_area.to_string()))?;

            if self.profile.line_submission {
                let mut lines = prompt.split('\n').peekable();
                while let Some(line) = lines.next() {
                    if lines.peek().is_some() {
                        transport.type_line(&area, line).await?;
                    } else {
                        transport.type_text(&area, line).await?;
                    }
                }
            } else {
                transport.type_text(&area, prompt).await?;
            }

            match &self.profile.send_button {
                Some(button) => {
                    let button = wait_for(transport, button, self.timeout)
                        .await?
                        .ok_or_else(|| TransportError::ElementNotFound(button.to_string()))?;
                    transport.click(&button).await?;
                }
                None => transport.submit(&area).await?,
            }
            tracing::info!("Prompt submitted");
            baseline
        };

        self.await_response(baseline).await
    }

    /// Ask the endpoint for a different answer to the last prompt
    pub async fn regenerate(&mut self) -> Result<String, SessionError> {
        self.ensure_ready()?;
        if self.last_prompt.is_none() {
            return Err(SessionError::NothingToRegenerate);
        }
        if self.profile.regenerate.is_empty() {
            return Err(SessionError::UnsupportedOperation("regenerate"));
        }
        self.state = SessionState::Busy;

        let span = self.span.clone();
        let result = self.regenerate_inner().instrument(span).await;
        self.settle(&result);

        if let Ok(response) = &result {
            if self.options.history() {
                self.history.push(Turn::regenerated(response.clone()));
            }
        }
        result
    }

    async fn regenerate_inner(&mut self) -> Result<String, SessionError> {
        let baseline = {
            let transport = self.live_transport()?;
            // the regenerated answer may replace the latest bubble in place
            let baseline = transport
                .locate_all(&self.profile.response, None)
                .await?
                .len()
                .saturating_sub(1);

            for control in &self.profile.regenerate {
                wait_for(transport, control, self.timeout)
                    .await?
                    .ok_or_else(|| TransportError::ElementNotFound(control.to_string()))?;
                let matches = transport.locate_all(control, None).await?;
                let target = matches
                    .last()
                    .ok_or_else(|| TransportError::ElementNotFound(control.to_string()))?;
                transport.click(target).await?;
            }
            tracing::info!("Requested regeneration");
            baseline
        };

        self.await_response(baseline).await
    }

    /// Wait for the answer that follows the `baseline`-th response bubble
    async fn await_response(&mut self, baseline: usize) -> Result<String, SessionError> {
        let transport = self
            .transport
            .as_deref()
            .ok_or(SessionError::NotReady(self.state))?;
        let probe = LatestResponse {
            transport,
            selector: &self.profile.response,
            baseline,
        };

        match self.profile.completion {
            CompletionMode::PollTextStable => self.reader.read_stable(&probe, &mut self.interim_output).await,
            CompletionMode::WaitAffordanceGone => {
                let busy = self
                    .profile
                    .busy
                    .as_ref()
                    .ok_or(SessionError::UnsupportedOperation("wait_affordance_gone"))?;

                self.interim_output.clear();
                let appeared = RetryWaiter::new(self.timeout, ELEMENT_POLL_INTERVAL)
                    .try_wait_until(|| probe.has_new_response(), true)
                    .await?;
                if !appeared {
                    return Err(SessionError::NoResponse { polls: 0 });
                }
                if !wait_affordance_gone(transport, busy, self.timeout).await? {
                    tracing::warn!("{} still present, reading partial output", busy);
                }

                let text = probe.read().await?;
                if text.is_empty() {
                    return Err(SessionError::NoResponse { polls: 1 });
                }
                self.interim_output = text.clone();
                Ok(text)
            }
        }
    }

    /// Return to an empty conversation
    ///
    /// `Ok(false)` means the endpoint cannot guarantee a clean state, either
    /// because it has no reset affordance or because the prompt area did not
    /// come back in time.
    pub async fn reset(&mut self) -> Result<bool, SessionError> {
        self.ensure_ready()?;
        if matches!(self.profile.reset, ResetStrategy::Unsupported) {
            tracing::warn!(parent: &self.span, "{} cannot reset its conversation", self.tag);
            return Ok(false);
        }
        self.state = SessionState::Busy;

        let span = self.span.clone();
        let result = self.reset_inner().instrument(span).await;
        self.settle(&result);

        if result.is_ok() {
            self.last_prompt = None;
            self.interim_output.clear();
        }
        result
    }

    async fn reset_inner(&mut self) -> Result<bool, SessionError> {
        let transport = self.live_transport()?;
        match &self.profile.reset {
            ResetStrategy::Navigate => transport.navigate(&self.profile.url).await?,
            ResetStrategy::Click { new_chat, confirm } => {
                let button = wait_for(transport, new_chat, self.timeout)
                    .await?
                    .ok_or_else(|| TransportError::ElementNotFound(new_chat.to_string()))?;
                transport.click(&button).await?;
                if let Some(confirm) = confirm {
                    if let Some(button) = wait_for(transport, confirm, ELEMENT_POLL_INTERVAL * 4).await? {
                        transport.click(&button).await?;
                    }
                }
            }
            ResetStrategy::Unsupported => return Ok(false),
        }

        let ready = wait_for(transport, &self.profile.prompt_area, self.timeout)
            .await?
            .is_some();
        if ready {
            tracing::info!("Conversation reset");
        } else {
            tracing::error!("Prompt area did not come back after reset");
        }
        Ok(ready)
    }

    /// Release the transport and flush history when auto-save is on
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        let transport = self.transport.take();

        let result = match transport {
            Some(transport) => transport.close().instrument(self.span.clone()).await,
            None => Ok(()),
        };

        if self.options.auto_save() {
            let path = self
                .options
                .save_path
                .clone()
                .unwrap_or_else(|| default_file_name(Some(&self.tag)));
            if let Err(e) = Transcript::from_turns(&self.tag, &self.history).save(&path) {
                tracing::error!(parent: &self.span, "Failed to save transcript: {}", e);
            }
        }

        tracing::info!(parent: &self.span, "Session closed");
        result.map_err(SessionError::from)
    }

    fn ensure_ready(&self) -> Result<(), SessionError> {
        if self.state.is_ready() {
            Ok(())
        } else {
            Err(SessionError::NotReady(self.state))
        }
    }

    fn live_transport(&self) -> Result<&dyn Transport, SessionError> {
        self.transport
            .as_deref()
            .ok_or(SessionError::NotReady(self.state))
    }

    /// Leave `Busy`: back to `Ready` unless the error is unrecoverable
    fn settle<T>(&mut self, result: &Result<T, SessionError>) {
        self.state = match result {
            Ok(_) => SessionState::Ready,
            Err(e) if e.is_recoverable() => {
                tracing::warn!(parent: &self.span, "{}", e);
                SessionState::Ready
            }
            Err(e) => {
                tracing::error!(parent: &self.span, "Session failed: {}", e);
                SessionState::Failed
            }
        };
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.transport.is_some() {
            tracing::warn!(parent: &self.span, "Session dropped without close, transport leaked");
        }
    }
}

/// Text of the newest response bubble past `baseline`
struct LatestResponse<'a> {
    transport: &'a dyn Transport,
    selector: &'a Selector,
    baseline: usize,
}

impl LatestResponse<'_> {
    async fn has_new_response(&self) -> Result<bool, TransportError> {
        let bubbles = self.transport.locate_all(self.selector, None).await?;
        Ok(bubbles.len() > self.baseline)
    }
}

#[async_trait]
impl OutputProbe for LatestResponse<'_> {
    async fn read(&self) -> Result<String, TransportError> {
        let bubbles = self.transport.locate_all(self.selector, None).await?;
        if bubbles.len() <= self.baseline {
            return Ok(String::new());
        }
        match bubbles.last() {
            Some(bubble) => self.transport.current_text(bubble).await,
            None => Ok(String::new()),
        }
    }
}

/// Poll for an element until it appears or `timeout` elapses
pub(crate) async fn wait_for(
    transport: &dyn Transport,
    selector: &Selector,
    timeout: Duration,
) -> Result<Option<ElementHandle>, TransportError> {
    RetryWaiter::new(timeout, ELEMENT_POLL_INTERVAL)
        .poll_for(move || transport.locate(selector, None), true)
        .await
}

/// Click an element if it is on the page right now
pub(crate) async fn click_if_present(
    transport: &dyn Transport,
    selector: &Selector,
) -> Result<bool, TransportError> {
    let Some(element) = transport.locate(selector, None).await? else {
        return Ok(false);
    };
    match transport.click(&element).await {
        Ok(()) => {
            tracing::debug!("Clicked {}", selector);
            Ok(true)
        }
        Err(TransportError::NotInteractable(_)) => {
            tracing::debug!("{} present but not clickable", selector);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
