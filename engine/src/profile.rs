//! Endpoint profiles
//!
//! An [`EndpointProfile`] is everything the engine knows about one family of
//! chat endpoints: where it lives, which elements matter, how to log in,
//! how to start over and how to tell when an answer is finished. Profiles
//! are plain data. A [`Catalog`] maps a kind name to its profile and ships
//! with built-in profiles that config files can extend or override.

use crate::reader::StabilizationParams;
use sdk::{Cookie, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a session decides that the endpoint has finished answering
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Poll the last response until it stops changing
    #[default]
    PollTextStable,

    /// Wait for the busy affordance to disappear, then read once
    WaitAffordanceGone,
}

/// Which credential a [`LoginStep::Fill`] types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    Username,
    Password,
}

/// One step of a declarative login flow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LoginStep {
    /// Wait for the element, then click it
    Click { target: Selector },

    /// Click the element only if it is already on the page
    ClickIfPresent { target: Selector },

    /// Wait for the element and type a credential into it
    Fill {
        target: Selector,
        value: Credential,
        /// Press enter after typing
        #[serde(default)]
        submit: bool,
    },
}

/// Elements whose presence after login signals a specific failure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthProbes {
    #[serde(default)]
    pub bad_username: Option<Selector>,
    #[serde(default)]
    pub bad_password: Option<Selector>,
    #[serde(default)]
    pub blocked: Option<Selector>,
}

/// How a session returns to an empty conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ResetStrategy {
    /// Load the profile URL again
    #[default]
    Navigate,

    /// Click a "new chat" control, then an optional confirmation
    Click {
        new_chat: Selector,
        #[serde(default)]
        confirm: Option<Selector>,
    },

    /// The endpoint offers no way to start over
    Unsupported,
}

/// Behavior flags derived from a profile
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_regenerate: bool,
    pub supports_reset: bool,
    pub completion: CompletionMode,
}

/// Data-driven description of one endpoint kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointProfile {
    /// Display name, also the default session tag and credential variable prefix
    pub name: String,

    pub url: String,

    /// Input the prompt is typed into
    pub prompt_area: Selector,

    /// Clicked to submit. When absent the prompt area itself is submitted.
    #[serde(default)]
    pub send_button: Option<Selector>,

    /// Matches every response bubble. The last match is the current answer.
    pub response: Selector,

    /// Present while the endpoint is generating
    #[serde(default)]
    pub busy: Option<Selector>,

    /// Anti-automation challenge clicked during verification
    #[serde(default)]
    pub challenge: Option<Selector>,

    /// Popups clicked away after loading, if present
    #[serde(default)]
    pub dismiss: Vec<Selector>,

    /// Cookies set after the first load, followed by a reload
    #[serde(default)]
    pub cookies: Vec<Cookie>,

    #[serde(default)]
    pub login: Vec<LoginStep>,

    #[serde(default)]
    pub auth_errors: AuthProbes,

    #[serde(default)]
    pub reset: ResetStrategy,

    /// Clicked in order to request a new answer. Empty means unsupported.
    #[serde(default)]
    pub regenerate: Vec<Selector>,

    #[serde(default)]
    pub completion: CompletionMode,

    /// Type multi-line prompts one line at a time with soft line breaks
    #[serde(default)]
    pub line_submission: bool,

    #[serde(default)]
    pub stabilization: StabilizationParams,
}

impl EndpointProfile {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_regenerate: !self.regenerate.is_empty(),
            supports_reset: !matches!(self.reset, ResetStrategy::Unsupported),
            completion: self.completion,
        }
    }

    /// Default environment variable holding the username
    pub fn uname_var(&self) -> String {
        format!("{}_UNAME", self.name)
    }

    /// Default environment variable holding the password
    pub fn pwd_var(&self) -> String {
        format!("{}_PWD", self.name)
    }

    pub fn requires_login(&self) -> bool {
        !self.login.is_empty()
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("profile name must not be empty".to_string());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(format!("{}: url must be http(s), got '{}'", self.name, self.url));
        }
        if self.completion == CompletionMode::WaitAffordanceGone && self.busy.is_none() {
            return Err(format!(
                "{}: wait_affordance_gone completion needs a busy selector",
                self.name
            ));
        }
        self.stabilization
            .validate()
            .map_err(|e| format!("{}: {}", self.name, e))?;
        Ok(())
    }
}

/// Profiles keyed by lowercase kind name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    profiles: BTreeMap<String, EndpointProfile>,
}

impl Catalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the built-in endpoint profiles
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for profile in [
            chatgpt(),
            claude(),
            copilot(),
            gemini(),
            huggingchat(),
            lechat(),
            pi(),
        ] {
            catalog.insert(profile.name.clone(), profile);
        }
        catalog
    }

    /// Add or replace a profile
    pub fn insert(&mut self, kind: impl AsRef<str>, profile: EndpointProfile) {
        self.profiles.insert(kind.as_ref().to_lowercase(), profile);
    }

    /// Look a kind up, ignoring case
    pub fn get(&self, kind: &str) -> Option<&EndpointProfile> {
        self.profiles.get(&kind.to_lowercase())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.get(kind).is_some()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EndpointProfile)> {
        self.profiles.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

// Built-in profiles

fn base(name: &str, url: &str, prompt_area: Selector, response: Selector) -> EndpointProfile {
    EndpointProfile {
        name: name.to_string(),
        url: url.to_string(),
        prompt_area,
        send_button: None,
        response,
        busy: None,
        challenge: None,
        dismiss: Vec::new(),
        cookies: Vec::new(),
        login: Vec::new(),
        auth_errors: AuthProbes::default(),
        reset: ResetStrategy::Navigate,
        regenerate: Vec::new(),
        completion: CompletionMode::PollTextStable,
        line_submission: false,
        stabilization: StabilizationParams::default(),
    }
}

fn chatgpt() -> EndpointProfile {
    let login_button = Selector::xpath("//button[@data-testid='login-button']");
    let continue_button = Selector::xpath("//button[text()='Continue']");
    EndpointProfile {
        busy: Some(Selector::xpath("//button[contains(@data-testid, 'stop-button')]")),
        challenge: Some(Selector::id("challenge-stage")),
        login: vec![
            LoginStep::Click {
                target: login_button,
            },
            LoginStep::Fill {
                target: Selector::xpath("//input[contains(@class, 'email-input') or @id='username']"),
                value: Credential::Username,
                submit: false,
            },
            LoginStep::Click {
                target: continue_button.clone(),
            },
            LoginStep::Fill {
                target: Selector::id("password"),
                value: Credential::Password,
                submit: false,
            },
            LoginStep::Click {
                target: continue_button,
            },
            LoginStep::ClickIfPresent {
                target: Selector::xpath("//div[contains(text(), 'Okay, let’s go')]"),
            },
        ],
        regenerate: vec![
            Selector::xpath("//button[div/span[contains(text(), '4o')]]"),
            Selector::xpath("//div[@role='menuitem']"),
        ],
        line_submission: true,
        ..base(
            "ChatGPT",
            "https://chatgpt.com",
            Selector::xpath("//div[@id='prompt-textarea']"),
            Selector::xpath("//div[@data-message-author-role='assistant']"),
        )
    }
}

fn claude() -> EndpointProfile {
    EndpointProfile {
        send_button: Some(Selector::xpath(r#"//button[@aria-label="Send Message"]"#)),
        dismiss: vec![Selector::xpath(r#"//div[text()="Start Chat"]"#)],
        regenerate: vec![Selector::xpath("//button[text()='Retry']")],
        line_submission: true,
        ..base(
            "Claude",
            "https://claude.ai",
            Selector::class("ProseMirror"),
            Selector::xpath(r#"//div[contains(@class, "grid-cols-1")]/div[@class="contents"]"#),
        )
    }
}

fn copilot() -> EndpointProfile {
    EndpointProfile {
        send_button: Some(Selector::xpath("//button[contains(@class, 'rounded-submitButton')]")),
        dismiss: vec![Selector::xpath("//button[@title='Maybe later']")],
        cookies: vec![Cookie::new("BCP", "AD=0&AL=0&SM=0")],
        reset: ResetStrategy::Click {
            new_chat: Selector::xpath("//button[@aria-label='Start new chat']"),
            confirm: None,
        },
        ..base(
            "Copilot",
            "https://copilot.microsoft.com",
            Selector::xpath("//textarea[@id='userInput']"),
            Selector::xpath("//div[@data-content='ai-message']/div"),
        )
    }
}

fn gemini() -> EndpointProfile {
    EndpointProfile {
        busy: Some(Selector::xpath("//rect")),
        dismiss: vec![Selector::xpath("//button[@data-test-id='got-it-button']")],
        reset: ResetStrategy::Click {
            new_chat: Selector::xpath(r#"//expandable-button[contains(@aria-label, "New chat")]"#),
            confirm: Some(Selector::xpath(r#"//button[@data-test-id="confirm-button"]"#)),
        },
        regenerate: vec![
            Selector::xpath("//span[@class='generate-drafts-button']"),
            Selector::class("regenerate-button"),
        ],
        stabilization: StabilizationParams {
            steps: 40,
            ..StabilizationParams::default()
        },
        ..base(
            "Gemini",
            "https://gemini.google.com/app",
            Selector::xpath(r#"//div[@role="textbox"]"#),
            Selector::tag("message-content"),
        )
    }
}

fn huggingchat() -> EndpointProfile {
    EndpointProfile {
        busy: Some(Selector::xpath("//button[contains(text(),'Stop generating')]")),
        login: vec![
            LoginStep::Click {
                target: Selector::xpath("//form[@action='/chat/login']//button"),
            },
            LoginStep::Fill {
                target: Selector::xpath("//input[@name='username']"),
                value: Credential::Username,
                submit: false,
            },
            LoginStep::Fill {
                target: Selector::xpath("//input[@name='password']"),
                value: Credential::Password,
                submit: true,
            },
        ],
        completion: CompletionMode::WaitAffordanceGone,
        line_submission: true,
        ..base(
            "HuggingChat",
            "https://huggingface.co/chat/",
            Selector::xpath("//textarea"),
            Selector::xpath("//div[@role='presentation']"),
        )
    }
}

fn lechat() -> EndpointProfile {
    EndpointProfile {
        busy: Some(Selector::xpath("//button[@aria-label='Stop generation']")),
        login: vec![
            LoginStep::Fill {
                target: Selector::xpath("//div[@data-testid='node/input/identifier']//input"),
                value: Credential::Username,
                submit: false,
            },
            LoginStep::Fill {
                target: Selector::xpath("//div[@data-testid='node/input/password']//input"),
                value: Credential::Password,
                submit: true,
            },
        ],
        regenerate: vec![Selector::xpath("//button[@aria-label='Rewrite']")],
        line_submission: true,
        ..base(
            "LeChat",
            "https://chat.mistral.ai/chat",
            Selector::xpath("//div/textarea"),
            Selector::xpath("//*[contains(@class,'prose')]"),
        )
    }
}

fn pi() -> EndpointProfile {
    EndpointProfile {
        send_button: Some(Selector::xpath("//button[@aria-label='Submit text']")),
        busy: Some(Selector::xpath("//button[@disabled]")),
        reset: ResetStrategy::Unsupported,
        line_submission: true,
        ..base(
            "Pi",
            "https://pi.ai/talk",
            Selector::xpath("//textarea[@role='textbox']"),
            Selector::xpath("//div[@class='flex items-center']"),
        )
    }
}
