//! Two-head conversations
//!
//! A [`ConversationDriver`] relays answers between the two sessions of a
//! swarm: each head's latest answer becomes the other head's next prompt.

use crate::orchestrator::Orchestrator;
use sdk::SwarmError;

/// Alternating dialogue between exactly two sessions
#[derive(Debug)]
pub struct ConversationDriver<'a> {
    orchestrator: &'a Orchestrator,
    heads: [String; 2],
    last_responses: Option<(String, String)>,
}

impl<'a> ConversationDriver<'a> {
    /// Bind to the two sessions of `orchestrator`, in registry order
    pub fn new(orchestrator: &'a Orchestrator) -> Result<Self, SwarmError> {
        let tags: Vec<String> = orchestrator.registry().tags().map(str::to_string).collect();
        let heads: [String; 2] = tags
            .try_into()
            .map_err(|tags: Vec<String>| SwarmError::HeadCount { found: tags.len() })?;

        tracing::info!("Conversation between {} and {}", heads[0], heads[1]);
        Ok(Self {
            orchestrator,
            heads,
            last_responses: None,
        })
    }

    pub fn heads(&self) -> (&str, &str) {
        (&self.heads[0], &self.heads[1])
    }

    /// Latest answers of both heads, once the conversation has started
    pub fn last_responses(&self) -> Option<(&str, &str)> {
        self.last_responses
            .as_ref()
            .map(|(r1, r2)| (r1.as_str(), r2.as_str()))
    }

    /// Prime both heads
    ///
    /// With `use_response1`, the first head's answer is appended to the
    /// second head's intro on a new line.
    pub async fn start(
        &mut self,
        intro1: &str,
        intro2: &str,
        use_response1: bool,
    ) -> Result<(String, String), SwarmError> {
        let r1 = self.ask(0, intro1).await?;
        let intro2 = if use_response1 {
            format!("{}\n{}", intro2, r1)
        } else {
            intro2.to_string()
        };
        let r2 = self.ask(1, &intro2).await?;

        self.last_responses = Some((r1.clone(), r2.clone()));
        Ok((r1, r2))
    }

    /// Run one more exchange
    ///
    /// `prompt1` defaults to the second head's last answer and `prompt2` to
    /// the first head's fresh answer. Empty overrides count as absent.
    pub async fn continue_turn(
        &mut self,
        prompt1: Option<&str>,
        prompt2: Option<&str>,
    ) -> Result<(String, String), SwarmError> {
        let prompt1 = match prompt1.filter(|p| !p.is_empty()) {
            Some(prompt) => prompt.to_string(),
            None => self
                .last_responses
                .as_ref()
                .map(|(_, r2)| r2.clone())
                .ok_or(SwarmError::ConversationNotStarted)?,
        };
        let r1 = self.ask(0, &prompt1).await?;

        let prompt2 = prompt2
            .filter(|p| !p.is_empty())
            .map_or_else(|| r1.clone(), str::to_string);
        let r2 = self.ask(1, &prompt2).await?;

        self.last_responses = Some((r1.clone(), r2.clone()));
        Ok((r1, r2))
    }

    async fn ask(&self, head: usize, prompt: &str) -> Result<String, SwarmError> {
        let tag = &self.heads[head];
        self.orchestrator
            .interact(tag, prompt)
            .await
            .map_err(|source| SwarmError::Session {
                tag: tag.clone(),
                source,
            })
    }
}
