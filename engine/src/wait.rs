//! Poll-until primitive
//!
//! [`RetryWaiter`] repeatedly evaluates an async predicate, sleeping a fixed
//! interval between evaluations, until the predicate holds or the timeout
//! elapses. It has no side effects of its own. Whether a timeout is an error
//! is the caller's decision; `fail_ok` only picks the log level.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Smallest interval allowed between two predicate calls
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Bounded polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryWaiter {
    timeout: Duration,
    poll_interval: Duration,
}

impl RetryWaiter {
    /// Create a waiter. A zero `poll_interval` is raised to 1 ms so the loop
    /// always yields between polls.
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait until `predicate` returns true
    ///
    /// The predicate is called immediately, then once per poll interval,
    /// with a final call at or after the deadline. Returns whether it held.
    pub async fn wait_until<F, Fut>(&self, mut predicate: F, fail_ok: bool) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = self.deadline();
        loop {
            if predicate().await {
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                self.report_timeout(fail_ok);
                return false;
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Wait until `predicate` returns false
    pub async fn wait_while<F, Fut>(&self, mut predicate: F, fail_ok: bool) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        self.wait_until(
            move || {
                let fut = predicate();
                async move { !fut.await }
            },
            fail_ok,
        )
        .await
    }

    /// Like [`wait_until`](Self::wait_until) but with a fallible predicate
    ///
    /// The first error aborts the wait and is returned as is.
    pub async fn try_wait_until<F, Fut, E>(&self, mut predicate: F, fail_ok: bool) -> Result<bool, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
    {
        let found = self
            .poll_for(
                move || {
                    let fut = predicate();
                    async move { fut.await.map(|ok| ok.then_some(())) }
                },
                fail_ok,
            )
            .await?;
        Ok(found.is_some())
    }

    /// Poll `probe` until it yields a value
    ///
    /// Same cadence as [`wait_until`](Self::wait_until). Returns `Ok(None)`
    /// on timeout and stops at the first error.
    pub async fn poll_for<T, F, Fut, E>(&self, mut probe: F, fail_ok: bool) -> Result<Option<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let deadline = self.deadline();
        loop {
            if let Some(value) = probe().await? {
                return Ok(Some(value));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                self.report_timeout(fail_ok);
                return Ok(None);
            }
            sleep(self.poll_interval).await;
        }
    }

    /// `None` when the timeout is too large to ever elapse
    fn deadline(&self) -> Option<Instant> {
        Instant::now().checked_add(self.timeout)
    }

    fn report_timeout(&self, fail_ok: bool) {
        if fail_ok {
            tracing::debug!("Condition not met within {:?}", self.timeout);
        } else {
            tracing::warn!("Condition not met within {:?}", self.timeout);
        }
    }
}

impl Default for RetryWaiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_millis(500))
    }
}
