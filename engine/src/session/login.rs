//! Declarative login flows

use super::{click_if_present, wait_for, ELEMENT_POLL_INTERVAL};
use crate::config::SessionOptions;
use crate::profile::{AuthProbes, Credential, EndpointProfile, LoginStep};
use crate::wait::RetryWaiter;
use sdk::{AuthError, Selector, Transport, TransportError};
use std::fmt;
use std::time::Duration;

/// How long the page gets to show a login error after the last step
const AUTH_PROBE_WINDOW: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub(crate) struct Credentials {
    username: String,
    password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    fn get(&self, which: Credential) -> &str {
        match which {
            Credential::Username => &self.username,
            Credential::Password => &self.password,
        }
    }
}

/// Find the credentials a profile's login flow needs
///
/// `Ok(None)` means login is skipped: the profile has no flow, the options
/// ask to skip it, or credentials are missing and the check is disabled.
pub(crate) fn resolve_credentials(
    profile: &EndpointProfile,
    options: &SessionOptions,
) -> Result<Option<Credentials>, AuthError> {
    if !profile.requires_login() || options.skip_login() {
        return Ok(None);
    }

    let uname_var = options.uname_var.clone().unwrap_or_else(|| profile.uname_var());
    let pwd_var = options.pwd_var.clone().unwrap_or_else(|| profile.pwd_var());

    let username = options.username.clone().or_else(|| read_env(&uname_var));
    let password = options.password.clone().or_else(|| read_env(&pwd_var));

    match (username, password) {
        (Some(username), Some(password)) => Ok(Some(Credentials { username, password })),
        _ if options.credential_check() => Err(AuthError::MissingCredentials { uname_var, pwd_var }),
        _ => {
            tracing::warn!(
                "No credentials in {} / {}, continuing without login",
                uname_var,
                pwd_var
            );
            Ok(None)
        }
    }
}

fn read_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|value| !value.is_empty())
}

/// Run every login step in order, then look for auth error markers
pub(crate) async fn run(
    transport: &dyn Transport,
    profile: &EndpointProfile,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<(), AuthError> {
    tracing::info!("Logging in to {}", profile.name);

    for (step, action) in profile.login.iter().enumerate() {
        run_step(transport, action, credentials, timeout)
            .await
            .map_err(|e| AuthError::FlowBroken {
                step,
                reason: e.to_string(),
            })?;
    }

    if let Some(err) = detect_failure(transport, &profile.auth_errors).await {
        return Err(err);
    }

    tracing::info!("Login submitted");
    Ok(())
}

async fn run_step(
    transport: &dyn Transport,
    action: &LoginStep,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<(), TransportError> {
    match action {
        LoginStep::Click { target } => {
            let element = require(transport, target, timeout).await?;
            transport.click(&element).await
        }
        LoginStep::ClickIfPresent { target } => {
            click_if_present(transport, target).await?;
            Ok(())
        }
        LoginStep::Fill {
            target,
            value,
            submit,
        } => {
            let element = require(transport, target, timeout).await?;
            transport.type_text(&element, credentials.get(*value)).await?;
            if *submit {
                transport.submit(&element).await?;
            }
            Ok(())
        }
    }
}

async fn require(
    transport: &dyn Transport,
    target: &Selector,
    timeout: Duration,
) -> Result<sdk::ElementHandle, TransportError> {
    wait_for(transport, target, timeout)
        .await?
        .ok_or_else(|| TransportError::ElementNotFound(target.to_string()))
}

/// Give the page a short window to show one of the known login errors
async fn detect_failure(transport: &dyn Transport, probes: &AuthProbes) -> Option<AuthError> {
    let checks: Vec<(&Selector, AuthError)> = [
        (probes.bad_username.as_ref(), AuthError::BadUsername),
        (probes.bad_password.as_ref(), AuthError::BadPassword),
        (probes.blocked.as_ref(), AuthError::AccountBlocked),
    ]
    .into_iter()
    .filter_map(|(selector, err)| selector.map(|s| (s, err)))
    .collect();

    if checks.is_empty() {
        return None;
    }

    let checks = checks.as_slice();
    let found = RetryWaiter::new(AUTH_PROBE_WINDOW, ELEMENT_POLL_INTERVAL)
        .poll_for(move || first_present(transport, checks), true)
        .await;

    match found {
        Ok(found) => found,
        Err(e) => {
            tracing::debug!("Could not check login errors: {}", e);
            None
        }
    }
}

async fn first_present(
    transport: &dyn Transport,
    checks: &[(&Selector, AuthError)],
) -> Result<Option<AuthError>, TransportError> {
    for (selector, err) in checks {
        if transport.is_present(selector).await? {
            return Ok(Some(err.clone()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Catalog;

    fn lechat() -> EndpointProfile {
        Catalog::builtin().get("lechat").cloned().unwrap()
    }

    #[test]
    fn test_no_login_flow_needs_no_credentials() {
        let pi = Catalog::builtin().get("pi").cloned().unwrap();
        let resolved = resolve_credentials(&pi, &SessionOptions::default()).unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn test_skip_login_bypasses_check() {
        let options = SessionOptions {
            skip_login: Some(true),
            ..Default::default()
        };
        assert!(resolve_credentials(&lechat(), &options).unwrap().is_none());
    }

    #[test]
    fn test_missing_credentials_fail_when_checked() {
        let options = SessionOptions {
            uname_var: Some("CHORUS_TEST_MISSING_UNAME".to_string()),
            pwd_var: Some("CHORUS_TEST_MISSING_PWD".to_string()),
            ..Default::default()
        };
        let err = resolve_credentials(&lechat(), &options).unwrap_err();
        assert_eq!(
            err,
            AuthError::MissingCredentials {
                uname_var: "CHORUS_TEST_MISSING_UNAME".to_string(),
                pwd_var: "CHORUS_TEST_MISSING_PWD".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_credentials_skip_when_unchecked() {
        let options = SessionOptions {
            uname_var: Some("CHORUS_TEST_MISSING_UNAME".to_string()),
            pwd_var: Some("CHORUS_TEST_MISSING_PWD".to_string()),
            credential_check: Some(false),
            ..Default::default()
        };
        assert!(resolve_credentials(&lechat(), &options).unwrap().is_none());
    }

    #[test]
    fn test_explicit_credentials_win() {
        let options = SessionOptions {
            username: Some("ada".to_string()),
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let creds = resolve_credentials(&lechat(), &options).unwrap().unwrap();
        assert_eq!(creds.get(Credential::Username), "ada");
        assert_eq!(creds.get(Credential::Password), "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
