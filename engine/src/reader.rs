//! Completion detection
//!
//! Chat endpoints stream their answer into the page and give no explicit
//! end-of-stream marker. Two strategies decide when an answer is complete:
//!
//! - [`StabilizingReader`] polls the visible text and declares completion once
//!   the same non-empty text has been seen on `same_answer_limit + 1`
//!   consecutive polls.
//! - [`wait_affordance_gone`] waits for a "stop generating" control to
//!   disappear, using the transport's blocking wait when it has one and
//!   polling otherwise.

use crate::wait::RetryWaiter;
use async_trait::async_trait;
use sdk::{Selector, SessionError, Transport, TransportError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Interval used when polling for a busy affordance to disappear
pub const AFFORDANCE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Something that can be asked for the currently visible output
#[async_trait]
pub trait OutputProbe: Sync {
    /// Current output. An empty string means nothing is visible yet.
    async fn read(&self) -> Result<String, TransportError>;
}

/// Tuning knobs for [`StabilizingReader`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StabilizationParams {
    /// Poll budget for each of the two phases
    #[serde(default = "default_steps")]
    pub steps: u32,

    /// Delay between two polls, in milliseconds
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Extra identical reads required before the output counts as settled
    #[serde(default = "default_same_answer_limit")]
    pub same_answer_limit: u32,
}

fn default_steps() -> u32 {
    200
}

fn default_period_ms() -> u64 {
    500
}

fn default_same_answer_limit() -> u32 {
    3
}

impl Default for StabilizationParams {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            period_ms: default_period_ms(),
            same_answer_limit: default_same_answer_limit(),
        }
    }
}

impl StabilizationParams {
    pub const MAX_STEPS: u32 = 10_000;
    pub const MAX_PERIOD_MS: u64 = 60_000;

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Time allowed for the first non-empty read: `steps` polls, the first
    /// one immediate
    pub fn first_read_budget(&self) -> Duration {
        self.period()
            .checked_mul(self.steps.saturating_sub(1))
            .unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.steps == 0 || self.steps > Self::MAX_STEPS {
            return Err(format!(
                "stabilization steps must be between 1 and {}, got {}",
                Self::MAX_STEPS,
                self.steps
            ));
        }
        if self.period_ms > Self::MAX_PERIOD_MS {
            return Err(format!(
                "stabilization period_ms must be at most {}, got {}",
                Self::MAX_PERIOD_MS,
                self.period_ms
            ));
        }
        Ok(())
    }
}

/// Polls an [`OutputProbe`] until its text stops changing
#[derive(Debug, Clone, Copy, Default)]
pub struct StabilizingReader {
    params: StabilizationParams,
}

impl StabilizingReader {
    pub fn new(params: StabilizationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &StabilizationParams {
        &self.params
    }

    /// Wait for the probe's output to settle and return it
    ///
    /// `interim` is cleared first and always holds the latest distinct
    /// non-empty read, so a caller can inspect partial output after an
    /// error. A sink whose `k`-th non-empty read is then held is read
    /// exactly `k + same_answer_limit + 1` times.
    pub async fn read_stable<P>(&self, probe: &P, interim: &mut String) -> Result<String, SessionError>
    where
        P: OutputProbe + ?Sized,
    {
        interim.clear();
        let period = self.params.period();
        let steps = self.params.steps;

        // Phase 1: first non-empty read, at most `steps` polls
        let first_wait = RetryWaiter::new(self.params.first_read_budget(), period);
        let first = first_wait
            .poll_for(
                move || async move {
                    let text = probe.read().await?;
                    Ok::<_, TransportError>((!text.is_empty()).then_some(text))
                },
                true,
            )
            .await?;

        let Some(first) = first else {
            tracing::debug!("No output after {} polls", steps);
            return Err(SessionError::NoResponse { polls: steps });
        };
        *interim = first;

        // Phase 2: hold until the same text is seen `limit + 1` times in a row
        let mut same_count = 0u32;
        let mut settled = false;
        for _ in 0..steps {
            sleep(period).await;
            let text = probe.read().await?;
            if !text.is_empty() && text == *interim {
                same_count += 1;
            } else {
                same_count = 0;
                *interim = text;
            }
            if same_count > self.params.same_answer_limit {
                settled = true;
                break;
            }
        }

        if interim.is_empty() {
            return Err(SessionError::NoResponse { polls: steps.saturating_mul(2) });
        }
        if !settled {
            tracing::debug!("Output still changing after {} polls, returning latest", steps);
        }
        Ok(interim.clone())
    }
}

/// Wait until no element matches `busy`
///
/// Prefers [`Transport::wait_until_absent`]. Transports that report it as
/// unsupported are polled through [`Transport::is_present`] instead.
/// Returns whether the affordance disappeared within `timeout`.
pub async fn wait_affordance_gone(
    transport: &dyn Transport,
    busy: &Selector,
    timeout: Duration,
) -> Result<bool, TransportError> {
    match transport.wait_until_absent(busy, timeout).await {
        Err(TransportError::Unsupported(_)) => {
            tracing::debug!("Blocking wait unavailable, polling for {} to disappear", busy);
            RetryWaiter::new(timeout, AFFORDANCE_POLL_INTERVAL)
                .try_wait_until(
                    move || async move { transport.is_present(busy).await.map(|present| !present) },
                    false,
                )
                .await
        }
        other => other,
    }
}
