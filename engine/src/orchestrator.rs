//! Swarm operations
//!
//! The [`Orchestrator`] fans prompts out to sessions of a
//! [`SessionRegistry`] and collects one result per addressed tag. A failed
//! session never fails the whole operation: its error is a value in the
//! result map.

use crate::config::SwarmConfig;
use crate::registry::SessionRegistry;
use crate::session::SessionHandle;
use crate::transcript::{default_file_name, Transcript};
use futures::future::join_all;
use regex::Regex;
use sdk::{SessionError, SwarmError};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Per-tag outcome of a multi-session operation
pub type Responses = BTreeMap<String, Result<String, SessionError>>;

/// Input of [`Orchestrator::aggregate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationRequest {
    /// Sessions that receive the aggregation prompt
    pub target_tags: BTreeSet<String>,
    /// Instruction placed before the rendered options
    pub prompt: String,
    /// Answers to aggregate, rendered in tag order
    pub source_responses: BTreeMap<String, String>,
}

impl AggregationRequest {
    pub fn new<I, S>(targets: I, prompt: impl Into<String>, source_responses: BTreeMap<String, String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target_tags: targets.into_iter().map(Into::into).collect(),
            prompt: prompt.into(),
            source_responses,
        }
    }

    /// The exact text sent to every target
    pub fn render_prompt(&self) -> String {
        format!(
            "{}\nHere are the options:\n{}",
            self.prompt,
            render_options(&self.source_responses)
        )
    }
}

/// Options of [`Orchestrator::broadcast_and_aggregate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Aggregators only take part in the aggregation step
    pub exclude_aggregators: bool,
    /// Reset aggregators before sending them the options
    pub reset_before: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            exclude_aggregators: true,
            reset_before: true,
        }
    }
}

static UNSUPPORTED_INPUT: OnceLock<Regex> = OnceLock::new();

/// Emoji and control characters other than newline
fn unsupported_input() -> &'static Regex {
    UNSUPPORTED_INPUT.get_or_init(|| {
        Regex::new(
            r"[\p{Extended_Pictographic}\p{Emoji_Modifier}\x{FE0F}\x{200D}\x{20E3}\x{1F1E6}-\x{1F1FF}]|[\p{Cc}&&[^\n]]",
        )
        .expect("Invalid input filter pattern")
    })
}

/// Strip characters chat inputs reject or mangle
pub fn sanitize_for_input(text: &str) -> String {
    unsupported_input().replace_all(text, "").into_owned()
}

/// Number answers from 0 in tag order, one `"{index}: {answer}"` per line
pub fn render_options(responses: &BTreeMap<String, String>) -> String {
    let rendered = responses
        .values()
        .enumerate()
        .map(|(index, response)| format!("{}: {}", index, response))
        .collect::<Vec<_>>()
        .join(" \n");
    sanitize_for_input(&rendered)
}

/// Keep the successful answers of a multi-session result
pub fn successful(responses: &Responses) -> BTreeMap<String, String> {
    responses
        .iter()
        .filter_map(|(tag, result)| result.as_ref().ok().map(|r| (tag.clone(), r.clone())))
        .collect()
}

/// Multi-session operations over one registry
#[derive(Debug)]
pub struct Orchestrator {
    registry: Arc<SessionRegistry>,
    transcript: Option<Mutex<Transcript>>,
    save_path: PathBuf,
}

impl Orchestrator {
    /// Orchestrator without a swarm transcript
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            transcript: None,
            save_path: default_file_name(None),
        }
    }

    /// Record every prompt and answer, saved on teardown
    pub fn with_transcript(mut self, save_path: Option<PathBuf>) -> Self {
        self.transcript = Some(Mutex::new(Transcript::new()));
        if let Some(path) = save_path {
            self.save_path = path;
        }
        self
    }

    pub fn from_config(registry: Arc<SessionRegistry>, config: &SwarmConfig) -> Self {
        let orchestrator = Self::new(registry);
        if config.auto_save {
            orchestrator.with_transcript(config.save_path.clone())
        } else {
            orchestrator
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    /// Snapshot of the swarm transcript, if one is kept
    pub fn transcript(&self) -> Option<Transcript> {
        self.transcript
            .as_ref()
            .map(|t| t.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Send one prompt to one session
    pub async fn interact(&self, tag: &str, prompt: &str) -> Result<String, SessionError> {
        let session = self
            .registry
            .get(tag)
            .ok_or_else(|| SessionError::UnknownTag(tag.to_string()))?;

        self.record("user", prompt);
        let response = session.send(prompt).await?;
        self.record(tag, &response);
        Ok(response)
    }

    /// Send `prompt` to every session not in `exclude`, concurrently
    pub async fn broadcast(&self, prompt: &str, exclude: &[&str]) -> Responses {
        let targets: Vec<String> = self
            .registry
            .tags()
            .filter(|tag| !exclude.contains(tag))
            .map(str::to_string)
            .collect();

        tracing::info!("Broadcasting to {}", targets.join(", "));
        self.record("user", prompt);
        self.dispatch(targets, prompt).await
    }

    /// Feed answers to the target sessions and collect their verdicts
    ///
    /// Targets that are not in the registry get [`SessionError::UnknownTag`].
    pub async fn aggregate(&self, request: &AggregationRequest, reset_before: bool) -> Responses {
        let targets: Vec<String> = request.target_tags.iter().cloned().collect();

        if reset_before {
            let refs: Vec<&str> = targets.iter().map(String::as_str).collect();
            let status = self.reset_many(Some(&refs)).await;
            for (tag, ok) in &status {
                if !ok {
                    tracing::warn!("{} could not reset before aggregation", tag);
                }
            }
        }

        let prompt = request.render_prompt();
        tracing::info!("Aggregating {} answer(s) on {}", request.source_responses.len(), targets.join(", "));
        self.record("user", &prompt);
        self.dispatch(targets, &prompt).await
    }

    /// Broadcast, then aggregate the successful answers on `aggregators`
    ///
    /// Returns the broadcast results and the aggregation results.
    pub async fn broadcast_and_aggregate(
        &self,
        prompt: &str,
        aggregators: &[&str],
        agg_prompt: &str,
        options: AggregateOptions,
    ) -> (Responses, Responses) {
        let exclude: &[&str] = if options.exclude_aggregators { aggregators } else { &[] };
        let responses = self.broadcast(prompt, exclude).await;

        let request = AggregationRequest::new(aggregators.iter().copied(), agg_prompt, successful(&responses));
        let verdicts = self.aggregate(&request, options.reset_before).await;
        (responses, verdicts)
    }

    /// Every session answers, then every session votes on all answers
    pub async fn broadcast_and_vote(&self, prompt: &str, voting_prompt: &str) -> (Responses, Responses) {
        let everyone: Vec<String> = self.registry.tags().map(str::to_string).collect();
        let everyone: Vec<&str> = everyone.iter().map(String::as_str).collect();
        self.broadcast_and_aggregate(
            prompt,
            &everyone,
            voting_prompt,
            AggregateOptions {
                exclude_aggregators: false,
                reset_before: true,
            },
        )
        .await
    }

    /// Reset the given sessions, or all of them, concurrently
    ///
    /// Errors and unknown tags map to `false`.
    pub async fn reset_many(&self, tags: Option<&[&str]>) -> BTreeMap<String, bool> {
        let targets: Vec<String> = match tags {
            Some(tags) => tags.iter().map(|t| t.to_string()).collect(),
            None => self.registry.tags().map(str::to_string).collect(),
        };

        let tasks = targets.iter().map(|tag| {
            let session = self.registry.get(tag).cloned();
            async move {
                let Some(session) = session else {
                    tracing::warn!("Cannot reset unknown session {}", tag);
                    return false;
                };
                match session.reset().await {
                    Ok(done) => done,
                    Err(e) => {
                        tracing::warn!("Reset of {} failed: {}", tag, e);
                        false
                    }
                }
            }
        });
        let status = join_all(tasks).await;
        targets.into_iter().zip(status).collect()
    }

    /// Write the swarm transcript to `path`, or to the configured save path
    pub fn save_transcript(&self, path: Option<&Path>) -> Result<bool, SwarmError> {
        let Some(transcript) = self.transcript() else {
            return Ok(false);
        };
        transcript.save(path.unwrap_or(&self.save_path))
    }

    /// Save the transcript when one is kept, then close every session
    pub async fn teardown(&self) -> Vec<String> {
        if let Err(e) = self.save_transcript(None) {
            tracing::error!("Failed to save swarm transcript: {}", e);
        }
        self.registry.teardown().await
    }

    /// Send `prompt` to `targets`, one task per session
    async fn dispatch(&self, targets: Vec<String>, prompt: &str) -> Responses {
        let tasks = targets.iter().map(|tag| {
            let session: Option<SessionHandle> = self.registry.get(tag).cloned();
            let prompt = prompt.to_string();
            async move {
                let Some(session) = session else {
                    return Err(SessionError::UnknownTag(tag.clone()));
                };
                tokio::spawn(async move { session.send(&prompt).await })
                    .await
                    .unwrap_or_else(|e| Err(SessionError::Aborted(e.to_string())))
            }
        });
        let outcomes = join_all(tasks).await;

        let mut responses = Responses::new();
        for (tag, outcome) in targets.into_iter().zip(outcomes) {
            match &outcome {
                Ok(response) => self.record(&tag, response),
                Err(e) => tracing::warn!("{} did not answer: {}", tag, e),
            }
            responses.insert(tag, outcome);
        }
        responses
    }

    fn record(&self, speaker: &str, content: &str) {
        if let Some(transcript) = &self.transcript {
            transcript
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(speaker, false, content);
        }
    }
}
