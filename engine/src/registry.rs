//! Session registry
//!
//! Builds every configured session concurrently and keeps the ones that
//! reached `Ready`. Construction never aborts because one session failed:
//! failures are collected per tag and the caller decides whether the swarm
//! is usable.

use crate::config::{SessionSpec, SwarmConfig};
use crate::session::{Session, SessionHandle};
use crate::transcript::tagged_path;
use crate::transport::TransportFactory;
use futures::future::join_all;
use rand::Rng;
use sdk::{SessionError, SessionState};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Knobs for [`SessionRegistry::build`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Upper bound of the random delay before each session starts
    pub startup_jitter: Duration,
    /// Upper bound for one operation on one session
    pub dispatch_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            startup_jitter: Duration::from_millis(4000),
            dispatch_timeout: Duration::from_secs(600),
        }
    }
}

impl From<&SwarmConfig> for RegistrySettings {
    fn from(config: &SwarmConfig) -> Self {
        Self {
            startup_jitter: config.startup_jitter(),
            dispatch_timeout: config.dispatch_timeout(),
        }
    }
}

/// Give each auto-saving session its own transcript file
///
/// Sessions sharing a save path would overwrite each other on teardown, so
/// every shared path gets the session tag appended to its stem.
fn separate_save_paths(specs: &mut [SessionSpec]) {
    let mut users: BTreeMap<PathBuf, usize> = BTreeMap::new();
    for spec in specs.iter().filter(|s| s.options.auto_save()) {
        if let Some(path) = &spec.options.save_path {
            *users.entry(path.clone()).or_default() += 1;
        }
    }

    for spec in specs.iter_mut().filter(|s| s.options.auto_save()) {
        let Some(path) = &spec.options.save_path else {
            continue;
        };
        if users.get(path).copied().unwrap_or_default() > 1 {
            let own = tagged_path(path, &spec.tag);
            tracing::debug!("{} saves its transcript to {}", spec.tag, own.display());
            spec.options.save_path = Some(own);
        }
    }
}

/// Ready sessions keyed by tag, in configuration order
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<SessionHandle>,
    failures: BTreeMap<String, SessionError>,
}

impl SessionRegistry {
    /// Start every session concurrently
    ///
    /// Each session waits a random delay in `[0, startup_jitter]` first so
    /// that a swarm does not hit the driver all at once.
    pub async fn build(
        mut specs: Vec<SessionSpec>,
        factory: Arc<dyn TransportFactory>,
        settings: RegistrySettings,
    ) -> Self {
        separate_save_paths(&mut specs);

        let jitter_ms = u64::try_from(settings.startup_jitter.as_millis()).unwrap_or(u64::MAX);
        let delays: Vec<Duration> = {
            let mut rng = rand::thread_rng();
            specs
                .iter()
                .map(|_| Duration::from_millis(rng.gen_range(0..=jitter_ms)))
                .collect()
        };

        let tags: Vec<String> = specs.iter().map(|s| s.tag.clone()).collect();
        tracing::info!("Starting {} session(s): {}", specs.len(), tags.join(", "));

        let tasks = specs.into_iter().zip(delays).map(|(spec, delay)| {
            let factory = Arc::clone(&factory);
            tokio::spawn(async move {
                sleep(delay).await;
                Session::connect(spec, factory.as_ref()).await
            })
        });
        let outcomes = join_all(tasks).await;

        let mut registry = Self::default();
        for (tag, outcome) in tags.into_iter().zip(outcomes) {
            let outcome = outcome.unwrap_or_else(|e| Err(SessionError::Aborted(e.to_string())));
            match outcome {
                Ok(session) => registry
                    .sessions
                    .push(SessionHandle::new(session, settings.dispatch_timeout)),
                Err(e) => {
                    tracing::error!("Session {} failed to start: {}", tag, e);
                    registry.failures.insert(tag, e);
                }
            }
        }

        tracing::info!(
            "{} session(s) ready, {} failed",
            registry.sessions.len(),
            registry.failures.len()
        );
        registry
    }

    /// Wrap already opened sessions
    pub fn from_sessions(sessions: Vec<Session>, dispatch_timeout: Duration) -> Self {
        Self {
            sessions: sessions
                .into_iter()
                .map(|s| SessionHandle::new(s, dispatch_timeout))
                .collect(),
            failures: BTreeMap::new(),
        }
    }

    /// True when no session failed to start
    pub fn is_ready(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &BTreeMap<String, SessionError> {
        &self.failures
    }

    /// One line per failed session, `tag: hint`
    pub fn failure_report(&self) -> Vec<String> {
        use sdk::ChorusErrorExt;
        self.failures
            .iter()
            .map(|(tag, e)| format!("{}: {} ({})", tag, e, e.user_hint()))
            .collect()
    }

    pub fn get(&self, tag: &str) -> Option<&SessionHandle> {
        self.sessions.iter().find(|s| s.tag() == tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.get(tag).is_some()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.sessions.iter().map(SessionHandle::tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionHandle> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Current state of every session
    pub async fn states(&self) -> BTreeMap<String, SessionState> {
        let states = join_all(self.sessions.iter().map(SessionHandle::state)).await;
        self.tags().map(str::to_string).zip(states).collect()
    }

    /// Close every session concurrently
    ///
    /// A failing close is logged and does not stop the others. Returns the
    /// tags whose close failed.
    pub async fn teardown(&self) -> Vec<String> {
        let closes = join_all(self.sessions.iter().map(|s| async move { (s.tag(), s.close().await) })).await;

        let mut failed = Vec::new();
        for (tag, result) in closes {
            if let Err(e) = result {
                tracing::warn!("Failed to close {}: {}", tag, e);
                failed.push(tag.to_string());
            }
        }
        tracing::info!("Swarm torn down");
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionOptions;
    use crate::profile::Catalog;

    fn saving_spec(tag: &str, path: Option<&str>) -> SessionSpec {
        SessionSpec {
            tag: tag.to_string(),
            kind: "pi".to_string(),
            profile: Catalog::builtin().get("pi").cloned().unwrap(),
            options: SessionOptions {
                auto_save: Some(true),
                save_path: path.map(PathBuf::from),
                ..Default::default()
            },
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_shared_save_paths_are_separated() {
        let mut specs = vec![
            saving_spec("A", Some("out/log.jsonl")),
            saving_spec("B", Some("out/log.jsonl")),
            saving_spec("C", Some("out/c.csv")),
            saving_spec("D", None),
        ];

        separate_save_paths(&mut specs);

        let paths: Vec<Option<PathBuf>> = specs.into_iter().map(|s| s.options.save_path).collect();
        assert_eq!(
            paths,
            vec![
                Some(PathBuf::from("out/log_A.jsonl")),
                Some(PathBuf::from("out/log_B.jsonl")),
                Some(PathBuf::from("out/c.csv")),
                None,
            ]
        );
    }
}
