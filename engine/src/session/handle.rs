use super::Session;
use sdk::{SessionError, SessionState, Turn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{error::Elapsed, timeout};

/// Shared, serialized access to one [`Session`]
///
/// Cloning a handle is cheap. Operations on the same session queue behind
/// one lock, and each operation is bounded by the dispatch timeout. A timed
/// out operation leaves the session `Failed`, since the endpoint may still
/// be producing output.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tag: String,
    inner: Arc<Mutex<Session>>,
    dispatch_timeout: Duration,
}

impl SessionHandle {
    pub fn new(session: Session, dispatch_timeout: Duration) -> Self {
        Self {
            tag: session.tag().to_string(),
            inner: Arc::new(Mutex::new(session)),
            dispatch_timeout,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn dispatch_timeout(&self) -> Duration {
        self.dispatch_timeout
    }

    /// Exclusive access to the session, waiting for any running operation
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().await
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state()
    }

    pub async fn history(&self) -> Vec<Turn> {
        self.inner.lock().await.history().to_vec()
    }

    pub async fn send(&self, prompt: &str) -> Result<String, SessionError> {
        let mut session = self.inner.lock().await;
        let outcome = timeout(self.dispatch_timeout, session.send(prompt)).await;
        self.settle(&mut session, outcome)
    }

    pub async fn regenerate(&self) -> Result<String, SessionError> {
        let mut session = self.inner.lock().await;
        let outcome = timeout(self.dispatch_timeout, session.regenerate()).await;
        self.settle(&mut session, outcome)
    }

    pub async fn reset(&self) -> Result<bool, SessionError> {
        let mut session = self.inner.lock().await;
        let outcome = timeout(self.dispatch_timeout, session.reset()).await;
        self.settle(&mut session, outcome)
    }

    pub async fn close(&self) -> Result<(), SessionError> {
        let mut session = self.inner.lock().await;
        let outcome = timeout(self.dispatch_timeout, session.close()).await;
        self.settle(&mut session, outcome)
    }

    fn settle<T>(
        &self,
        session: &mut Session,
        outcome: Result<Result<T, SessionError>, Elapsed>,
    ) -> Result<T, SessionError> {
        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("{} did not finish within {:?}", self.tag, self.dispatch_timeout);
                session.mark_failed();
                Err(SessionError::TimedOut(self.dispatch_timeout))
            }
        }
    }
}
