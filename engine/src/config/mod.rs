//! Configuration management
//!
//! This module handles loading, validation, and management of the Chorus configuration.
//! Configuration is stored in TOML format at ~/.chorus/config.toml unless a path is
//! given on the command line.
//!
//! # Configuration Sections
//!
//! - **swarm**: auto-save, transcript path, logging, timeouts, startup jitter
//! - **webdriver**: where the browser driver listens and which browser it drives
//! - **shared**: session options applied to every session
//! - **sessions**: one entry per endpoint, `tag` + `kind` + per-session options
//! - **kinds**: custom endpoint profiles, added to or replacing the built-in ones
//!
//! Per-session options override shared options field by field.
//!
//! # Path Expansion
//!
//! `~` is expanded to the user's home directory for every path option.
//!
//! # Examples
//!
//! ```no_run
//! use chorus_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! for spec in config.session_specs()? {
//!     println!("{} -> {}", spec.tag, spec.profile.url);
//! }
//! # Ok(())
//! # }
//! ```

use crate::profile::{Catalog, EndpointProfile};
use crate::transcript::tagged_path;
use sdk::{Cookie, SessionError, SwarmError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Swarm-wide settings
    #[serde(default)]
    pub swarm: SwarmConfig,

    /// Browser driver connection
    #[serde(default)]
    pub webdriver: WebDriverConfig,

    /// Options shared by every session
    #[serde(default)]
    pub shared: SessionOptions,

    /// Sessions, in the order they are built and iterated
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,

    /// Custom endpoint profiles keyed by kind
    #[serde(default)]
    pub kinds: BTreeMap<String, EndpointProfile>,
}

/// Swarm-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Keep a swarm transcript and write it on teardown
    #[serde(default)]
    pub auto_save: bool,

    /// Swarm transcript path. The extension picks the format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_path: Option<PathBuf>,

    /// Raise logging to at least `info`
    #[serde(default)]
    pub verbose: bool,

    /// Element wait timeout for every session, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upper bound of the random delay before each session starts
    #[serde(default = "default_startup_jitter_ms")]
    pub startup_jitter_ms: u64,

    /// Upper bound for one dispatched operation on one session, in seconds
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
}

/// Browser family behind the driver
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chrome,
    Firefox,
}

/// Browser driver connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDriverConfig {
    /// Base URL of a running chromedriver/geckodriver
    #[serde(default = "default_webdriver_url")]
    pub url: String,

    #[serde(default)]
    pub browser: Browser,

    /// Timeout for a single driver request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Per-session options
///
/// Every field is optional so that a session entry only has to name what
/// differs from `[shared]`.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incognito: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_login: Option<bool>,

    /// Fail at startup when the login flow has no credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_check: Option<bool>,

    /// Environment variable holding the username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uname_var: Option<String>,

    /// Environment variable holding the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwd_var: Option<String>,

    /// Explicit username. Prefer the environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Explicit password. Prefer the environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Browser profile directory to reuse an existing login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_dir: Option<PathBuf>,

    /// Extra browser command line arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_arguments: Option<Vec<String>>,

    /// Cookies added after the first page load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<Vec<Cookie>>,

    /// Record turns in the session history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<bool>,

    /// Write the session history when the session closes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_save: Option<bool>,

    /// Session transcript path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_path: Option<PathBuf>,

    /// Replace the profile URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Replace the swarm element wait timeout, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("headless", &self.headless)
            .field("incognito", &self.incognito)
            .field("skip_login", &self.skip_login)
            .field("credential_check", &self.credential_check)
            .field("uname_var", &self.uname_var)
            .field("pwd_var", &self.pwd_var)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("user_data_dir", &self.user_data_dir)
            .field("driver_arguments", &self.driver_arguments)
            .field("cookies", &self.cookies.as_ref().map(Vec::len))
            .field("history", &self.history)
            .field("auto_save", &self.auto_save)
            .field("save_path", &self.save_path)
            .field("url", &self.url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl SessionOptions {
    /// Layer `over` on top of `self`; fields set in `over` win
    pub fn merged_with(&self, over: &SessionOptions) -> SessionOptions {
        fn pick<T: Clone>(over: &Option<T>, base: &Option<T>) -> Option<T> {
            over.clone().or_else(|| base.clone())
        }

        SessionOptions {
            headless: pick(&over.headless, &self.headless),
            incognito: pick(&over.incognito, &self.incognito),
            skip_login: pick(&over.skip_login, &self.skip_login),
            credential_check: pick(&over.credential_check, &self.credential_check),
            uname_var: pick(&over.uname_var, &self.uname_var),
            pwd_var: pick(&over.pwd_var, &self.pwd_var),
            username: pick(&over.username, &self.username),
            password: pick(&over.password, &self.password),
            user_data_dir: pick(&over.user_data_dir, &self.user_data_dir),
            driver_arguments: pick(&over.driver_arguments, &self.driver_arguments),
            cookies: pick(&over.cookies, &self.cookies),
            history: pick(&over.history, &self.history),
            auto_save: pick(&over.auto_save, &self.auto_save),
            save_path: pick(&over.save_path, &self.save_path),
            url: pick(&over.url, &self.url),
            timeout_secs: pick(&over.timeout_secs, &self.timeout_secs),
        }
    }

    pub fn headless(&self) -> bool {
        self.headless.unwrap_or(true)
    }

    pub fn incognito(&self) -> bool {
        self.incognito.unwrap_or(true)
    }

    pub fn skip_login(&self) -> bool {
        self.skip_login.unwrap_or(false)
    }

    pub fn credential_check(&self) -> bool {
        self.credential_check.unwrap_or(true)
    }

    pub fn auto_save(&self) -> bool {
        self.auto_save.unwrap_or(false)
    }

    /// History is kept when asked for, and always when it will be saved
    pub fn history(&self) -> bool {
        self.history.unwrap_or(false) || self.auto_save()
    }

    fn expand_paths(&mut self) -> Result<(), SwarmError> {
        if let Some(dir) = &self.user_data_dir {
            self.user_data_dir = Some(expand_path(dir)?);
        }
        if let Some(path) = &self.save_path {
            self.save_path = Some(expand_path(path)?);
        }
        Ok(())
    }
}

/// One `[[sessions]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    /// Unique name; defaults to the kind's display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Endpoint kind, looked up in the catalog
    pub kind: String,

    #[serde(default)]
    pub options: SessionOptions,
}

/// A session entry resolved against the catalog and shared options
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub tag: String,
    pub kind: String,
    pub profile: EndpointProfile,
    pub options: SessionOptions,
    /// Element wait timeout
    pub timeout: Duration,
}

fn default_timeout_secs() -> u64 {
    90
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_startup_jitter_ms() -> u64 {
    4000
}

fn default_dispatch_timeout_secs() -> u64 {
    600
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            auto_save: false,
            save_path: None,
            verbose: false,
            timeout_secs: default_timeout_secs(),
            log_level: default_log_level(),
            startup_jitter_ms: default_startup_jitter_ms(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
        }
    }
}

impl SwarmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn startup_jitter(&self) -> Duration {
        Duration::from_millis(self.startup_jitter_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    /// Log level after applying `verbose`
    pub fn effective_log_level(&self) -> &str {
        match self.log_level.as_str() {
            "error" | "warn" if self.verbose => "info",
            level => level,
        }
    }
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: default_webdriver_url(),
            browser: Browser::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl WebDriverConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load configuration from the default location (~/.chorus/config.toml)
    ///
    /// If the configuration file doesn't exist, a default one is written first.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or written
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, SwarmError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, SwarmError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| SwarmError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self, SwarmError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| SwarmError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, SwarmError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SwarmError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| SwarmError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| SwarmError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Wrote default configuration to {}", path.display());
        Ok(config)
    }

    /// Get the default configuration file path (~/.chorus/config.toml)
    pub fn default_config_path() -> Result<PathBuf, SwarmError> {
        let home = dirs::home_dir()
            .ok_or_else(|| SwarmError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".chorus").join("config.toml"))
    }

    /// Default configuration: two endpoints that need no login
    pub fn default_config() -> Self {
        Self {
            swarm: SwarmConfig::default(),
            webdriver: WebDriverConfig::default(),
            shared: SessionOptions {
                headless: Some(true),
                incognito: Some(true),
                credential_check: Some(false),
                ..SessionOptions::default()
            },
            sessions: vec![
                SessionEntry {
                    tag: None,
                    kind: "pi".to_string(),
                    options: SessionOptions::default(),
                },
                SessionEntry {
                    tag: None,
                    kind: "copilot".to_string(),
                    options: SessionOptions::default(),
                },
            ],
            kinds: BTreeMap::new(),
        }
    }

    /// Built-in profiles plus the `[kinds]` section
    pub fn catalog(&self) -> Catalog {
        let mut catalog = Catalog::builtin();
        for (kind, profile) in &self.kinds {
            catalog.insert(kind, profile.clone());
        }
        catalog
    }

    /// Resolve every session entry, in configuration order
    pub fn session_specs(&self) -> Result<Vec<SessionSpec>, SwarmError> {
        let catalog = self.catalog();
        self.sessions
            .iter()
            .map(|entry| {
                let mut profile = catalog.get(&entry.kind).cloned().ok_or_else(|| {
                    SwarmError::Session {
                        tag: entry.tag.clone().unwrap_or_else(|| entry.kind.clone()),
                        source: SessionError::UnknownKind(entry.kind.clone()),
                    }
                })?;
                let tag = entry.tag.clone().unwrap_or_else(|| profile.name.clone());
                let mut options = self.shared.merged_with(&entry.options);
                if let Some(url) = &options.url {
                    profile.url = url.clone();
                }
                // a shared save path is one file per session, not one for all
                if entry.options.save_path.is_none() {
                    if let Some(shared) = &self.shared.save_path {
                        options.save_path = Some(tagged_path(shared, &tag));
                    }
                }
                let timeout = options
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| self.swarm.timeout());

                Ok(SessionSpec {
                    tag,
                    kind: entry.kind.to_lowercase(),
                    profile,
                    options,
                    timeout,
                })
            })
            .collect()
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates the log level and timeouts
    /// - Validates custom profiles and the driver URL
    /// - Checks that every session kind is known and every tag is unique
    /// - Expands ~ in paths
    fn validate_and_process(&mut self) -> Result<(), SwarmError> {
        // Validate log level
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.swarm.log_level.as_str()) {
            return Err(SwarmError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.swarm.log_level,
                valid_log_levels.join(", ")
            )));
        }

        // Validate timeouts
        if self.swarm.timeout_secs == 0 {
            return Err(SwarmError::Config("timeout_secs must be positive".to_string()));
        }
        if self.swarm.dispatch_timeout_secs == 0 {
            return Err(SwarmError::Config(
                "dispatch_timeout_secs must be positive".to_string(),
            ));
        }
        if self.webdriver.request_timeout_secs == 0 {
            return Err(SwarmError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }

        // Validate driver URL
        if !self.webdriver.url.starts_with("http://") && !self.webdriver.url.starts_with("https://") {
            return Err(SwarmError::Config(format!(
                "webdriver url must be http(s), got '{}'",
                self.webdriver.url
            )));
        }

        // Validate custom profiles
        for (kind, profile) in &self.kinds {
            profile
                .validate()
                .map_err(|e| SwarmError::Config(format!("Invalid kind '{}': {}", kind, e)))?;
        }

        // Validate sessions: known kinds, positive timeouts, unique tags
        let catalog = self.catalog();
        let mut seen = HashSet::new();
        for entry in &self.sessions {
            let profile = catalog.get(&entry.kind).ok_or_else(|| {
                SwarmError::Config(format!(
                    "Unknown kind '{}'. Known kinds: {}",
                    entry.kind,
                    catalog.kinds().collect::<Vec<_>>().join(", ")
                ))
            })?;

            if entry.options.timeout_secs == Some(0) {
                return Err(SwarmError::Config(format!(
                    "timeout_secs must be positive for session '{}'",
                    entry.kind
                )));
            }

            let tag = entry.tag.as_deref().unwrap_or(&profile.name);
            if tag.trim().is_empty() {
                return Err(SwarmError::Config("Session tag must not be empty".to_string()));
            }
            if !seen.insert(tag.to_string()) {
                return Err(SwarmError::Config(format!(
                    "Duplicate session tag '{}'. Give each session a unique tag",
                    tag
                )));
            }
        }

        // Expand paths
        if let Some(path) = &self.swarm.save_path {
            self.swarm.save_path = Some(expand_path(path)?);
        }
        self.shared.expand_paths()?;
        for entry in &mut self.sessions {
            entry.options.expand_paths()?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, SwarmError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| SwarmError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| SwarmError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| SwarmError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
