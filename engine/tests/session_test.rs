//! Session state machine against the in-memory chat page

mod common;

use chorus_engine::profile::{CompletionMode, ResetStrategy};
use chorus_engine::session::{Session, SessionHandle, VerifyPolicy};
use common::{fake_profile, fake_spec, login_profile, spec, Behavior, FakeFactory, FakeTransport};
use sdk::{AuthError, Role, SessionError, SessionState, TransportError};
use std::time::Duration;
use tempfile::TempDir;

async fn ready_session(tag: &str, behavior: Behavior) -> (Session, std::sync::Arc<std::sync::Mutex<common::ChatState>>) {
    let (transport, page) = FakeTransport::new(tag, behavior);
    let span = tracing::info_span!("test_session", tag);
    let mut session = Session::new(fake_spec(tag), Box::new(transport)).with_span(span);
    session.open().await.unwrap();
    (session, page)
}

#[tokio::test(start_paused = true)]
async fn test_open_reaches_ready() {
    let (session, page) = ready_session("A", Behavior::default()).await;

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.tag(), "A");
    assert_eq!(page.lock().unwrap().calls[0], "navigate https://a.example/chat");
}

#[tokio::test(start_paused = true)]
async fn test_challenge_is_clicked_away() {
    let behavior = Behavior {
        challenge_clicks: 2,
        ..Default::default()
    };
    let (session, page) = ready_session("A", behavior).await;

    assert_eq!(session.state(), SessionState::Ready);
    let clicks = page
        .lock()
        .unwrap()
        .calls
        .iter()
        .filter(|c| *c == "click challenge")
        .count();
    assert_eq!(clicks, 2);
}

#[tokio::test(start_paused = true)]
async fn test_verification_exhaustion_fails_session() {
    let behavior = Behavior {
        challenge_clicks: u32::MAX,
        ..Default::default()
    };
    let (transport, _page) = FakeTransport::new("A", behavior);
    let mut session = Session::new(fake_spec("A"), Box::new(transport)).with_verify_policy(VerifyPolicy {
        attempts: 3,
        backoff: Duration::from_millis(10),
    });

    let err = session.open().await.unwrap_err();
    assert_eq!(err, SessionError::Verification { attempts: 3 });
    assert_eq!(session.state(), SessionState::Failed);
    session.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_releases_transport() {
    let factory = FakeFactory::new().with(
        "A",
        Behavior {
            challenge_clicks: u32::MAX,
            ..Default::default()
        },
    );

    let err = Session::connect(fake_spec("A"), &factory).await.unwrap_err();
    assert_eq!(err, SessionError::Verification { attempts: 10 });
    assert_eq!(factory.page("A").lock().unwrap().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_factory_failure_is_bootstrap_error() {
    let factory = FakeFactory::new().with(
        "A",
        Behavior {
            fail_open: true,
            ..Default::default()
        },
    );

    let err = Session::connect(fake_spec("A"), &factory).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Bootstrap { ref tag, source: TransportError::Connection(_) } if tag == "A"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_send_waits_for_streamed_answer() {
    let behavior = Behavior {
        stream_chunks: 4,
        ..Default::default()
    };
    let (mut session, page) = ready_session("A", behavior).await;

    let answer = session.send("repeat: a fairly long sentence").await.unwrap();

    assert_eq!(answer, "a fairly long sentence");
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.last_prompt(), Some("repeat: a fairly long sentence"));
    assert_eq!(session.interim_output(), "a fairly long sentence");
    assert_eq!(page.lock().unwrap().submitted, vec!["repeat: a fairly long sentence"]);

    let history = session.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Agent);
    assert_eq!(history[1].content, "a fairly long sentence");
}

#[tokio::test(start_paused = true)]
async fn test_second_send_reads_new_bubble() {
    let (mut session, _page) = ready_session("A", Behavior::default()).await;

    assert_eq!(session.send("repeat: one").await.unwrap(), "one");
    assert_eq!(session.send("repeat: two").await.unwrap(), "two");
}

#[tokio::test(start_paused = true)]
async fn test_silent_endpoint_is_recoverable() {
    let behavior = Behavior {
        silent: true,
        ..Default::default()
    };
    let (mut session, _page) = ready_session("A", behavior).await;

    let err = session.send("hello?").await.unwrap_err();
    assert!(matches!(err, SessionError::NoResponse { .. }));
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_lost_connection_fails_session() {
    let behavior = Behavior {
        broken_submit: true,
        ..Default::default()
    };
    let (mut session, _page) = ready_session("A", behavior).await;

    let err = session.send("hello").await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(TransportError::Connection(_))));
    assert_eq!(session.state(), SessionState::Failed);

    let err = session.send("again").await.unwrap_err();
    assert_eq!(err, SessionError::NotReady(SessionState::Failed));
}

#[tokio::test(start_paused = true)]
async fn test_regenerate() {
    let (mut session, _page) = ready_session("A", Behavior::default()).await;

    assert_eq!(session.regenerate().await.unwrap_err(), SessionError::NothingToRegenerate);

    session.send("repeat: book").await.unwrap();
    let again = session.regenerate().await.unwrap();

    assert_eq!(again, "book (regenerated)");
    let last = session.history().last().unwrap();
    assert!(last.regenerated);
    assert_eq!(last.content, "book (regenerated)");
}

#[tokio::test(start_paused = true)]
async fn test_regenerate_unsupported() {
    let mut profile = fake_profile("A");
    profile.regenerate.clear();
    let (transport, _page) = FakeTransport::new("A", Behavior::default());
    let mut session = Session::new(spec("A", profile), Box::new(transport));
    session.open().await.unwrap();
    session.send("repeat: x").await.unwrap();

    let err = session.regenerate().await.unwrap_err();
    assert_eq!(err, SessionError::UnsupportedOperation("regenerate"));
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_reset_is_idempotent() {
    let (mut session, page) = ready_session("A", Behavior::default()).await;
    session.send("repeat: x").await.unwrap();
    assert_eq!(page.lock().unwrap().bubbles.len(), 1);

    assert!(session.reset().await.unwrap());
    assert!(page.lock().unwrap().bubbles.is_empty());
    assert_eq!(session.last_prompt(), None);

    assert!(session.reset().await.unwrap());
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.regenerate().await.unwrap_err(), SessionError::NothingToRegenerate);
}

#[tokio::test(start_paused = true)]
async fn test_reset_by_click() {
    let mut profile = fake_profile("A");
    profile.reset = ResetStrategy::Click {
        new_chat: sdk::Selector::css(common::NEW_CHAT),
        confirm: None,
    };
    let (transport, page) = FakeTransport::new("A", Behavior::default());
    let mut session = Session::new(spec("A", profile), Box::new(transport));
    session.open().await.unwrap();
    session.send("repeat: x").await.unwrap();

    assert!(session.reset().await.unwrap());
    let page = page.lock().unwrap();
    assert!(page.bubbles.is_empty());
    assert!(page.calls.contains(&"click new-chat".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_reset_unsupported_is_not_fatal() {
    let mut profile = fake_profile("A");
    profile.reset = ResetStrategy::Unsupported;
    let (transport, _page) = FakeTransport::new("A", Behavior::default());
    let mut session = Session::new(spec("A", profile), Box::new(transport));
    session.open().await.unwrap();

    assert!(!session.reset().await.unwrap());
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent() {
    let (mut session, page) = ready_session("A", Behavior::default()).await;

    session.close().await.unwrap();
    session.close().await.unwrap();

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(page.lock().unwrap().closes, 1);
    assert_eq!(
        session.send("hi").await.unwrap_err(),
        SessionError::NotReady(SessionState::Closed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_login_types_credentials() {
    let mut spec = spec("L", login_profile("L"));
    spec.options.username = Some("ada".to_string());
    spec.options.password = Some("hunter2".to_string());
    let (transport, page) = FakeTransport::new("L", Behavior::default());
    let mut session = Session::new(spec, Box::new(transport));

    session.open().await.unwrap();

    let page = page.lock().unwrap();
    assert_eq!(page.credentials, ("ada".to_string(), "hunter2".to_string()));
    assert!(page.login_submitted);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_password() {
    let mut spec = spec("L", login_profile("L"));
    spec.options.username = Some("ada".to_string());
    spec.options.password = Some("wrong".to_string());
    let behavior = Behavior {
        bad_password: true,
        ..Default::default()
    };
    let (transport, _page) = FakeTransport::new("L", behavior);
    let mut session = Session::new(spec, Box::new(transport));

    let err = session.open().await.unwrap_err();
    assert_eq!(err, SessionError::Auth(AuthError::BadPassword));
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_missing_credentials_fail_before_loading() {
    let mut spec = spec("L", login_profile("L"));
    spec.options.uname_var = Some("CHORUS_SESSION_TEST_UNAME".to_string());
    spec.options.pwd_var = Some("CHORUS_SESSION_TEST_PWD".to_string());
    let (transport, page) = FakeTransport::new("L", Behavior::default());
    let mut session = Session::new(spec, Box::new(transport));

    let err = session.open().await.unwrap_err();
    assert!(matches!(err, SessionError::Auth(AuthError::MissingCredentials { .. })));
    assert!(page.lock().unwrap().calls.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_prompt_area() {
    let behavior = Behavior {
        prompt_missing: true,
        ..Default::default()
    };
    let (transport, _page) = FakeTransport::new("A", behavior);
    let mut session = Session::new(fake_spec("A"), Box::new(transport));

    assert_eq!(session.open().await.unwrap_err(), SessionError::NotInteractive);
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_affordance_completion_uses_blocking_wait() {
    let mut profile = fake_profile("A");
    profile.completion = CompletionMode::WaitAffordanceGone;
    let behavior = Behavior {
        stream_chunks: 5,
        blocking_wait: true,
        ..Default::default()
    };
    let (transport, page) = FakeTransport::new("A", behavior);
    let mut session = Session::new(spec("A", profile), Box::new(transport));
    session.open().await.unwrap();

    assert_eq!(session.send("repeat: done streaming").await.unwrap(), "done streaming");
    assert!(page.lock().unwrap().calls.contains(&"wait_absent .stop".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_affordance_completion_falls_back_to_polling() {
    let mut profile = fake_profile("A");
    profile.completion = CompletionMode::WaitAffordanceGone;
    let behavior = Behavior {
        stream_chunks: 5,
        ..Default::default()
    };
    let (transport, page) = FakeTransport::new("A", behavior);
    let mut session = Session::new(spec("A", profile), Box::new(transport));
    session.open().await.unwrap();

    assert_eq!(session.send("repeat: done streaming").await.unwrap(), "done streaming");
    assert!(!page.lock().unwrap().calls.iter().any(|c| c.starts_with("wait_absent")));
}

#[tokio::test(start_paused = true)]
async fn test_multiline_prompt_uses_soft_breaks() {
    let mut profile = fake_profile("A");
    profile.line_submission = true;
    let (transport, page) = FakeTransport::new("A", Behavior::default());
    let mut session = Session::new(spec("A", profile), Box::new(transport));
    session.open().await.unwrap();

    session.send("first\nsecond").await.unwrap();

    let page = page.lock().unwrap();
    assert!(page.calls.contains(&"type_line prompt first".to_string()));
    assert!(page.calls.contains(&"type prompt second".to_string()));
    assert_eq!(page.submitted, vec!["first\nsecond"]);
}

#[tokio::test(start_paused = true)]
async fn test_handle_serializes_concurrent_sends() {
    let behavior = Behavior {
        stream_chunks: 3,
        ..Default::default()
    };
    let (session, page) = ready_session("A", behavior).await;
    let handle = SessionHandle::new(session, Duration::from_secs(60));

    let (first, second) = tokio::join!(handle.send("repeat: first"), handle.send("repeat: second"));

    assert_eq!(first.unwrap(), "first");
    assert_eq!(second.unwrap(), "second");
    assert_eq!(page.lock().unwrap().overlaps, 0);
    assert_eq!(handle.history().await.len(), 4);
    handle.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_timeout_fails_session() {
    let behavior = Behavior {
        hang: true,
        ..Default::default()
    };
    let (session, _page) = ready_session("A", behavior).await;
    let handle = SessionHandle::new(session, Duration::from_secs(5));

    let err = handle.send("hello").await.unwrap_err();
    assert_eq!(err, SessionError::TimedOut(Duration::from_secs(5)));
    assert_eq!(handle.state().await, SessionState::Failed);
    handle.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_auto_save_on_close() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("session.jsonl");
    let mut spec = fake_spec("A");
    spec.options.auto_save = Some(true);
    spec.options.save_path = Some(path.clone());
    let (transport, _page) = FakeTransport::new("A", Behavior::default());
    let mut session = Session::new(spec, Box::new(transport));
    session.open().await.unwrap();
    session.send("repeat: saved").await.unwrap();

    session.close().await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("\"speaker\":\"user\""));
    assert!(lines[1].contains("\"content\":\"saved\""));
}
