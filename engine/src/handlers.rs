//! Command handlers for CLI operations
//!
//! `kinds` and `check` only read the configuration. The other handlers
//! start the swarm, run one operation, print the results and tear the swarm
//! down, also when the operation itself failed.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::Config;
use crate::conversation::ConversationDriver;
use crate::orchestrator::{AggregateOptions, Orchestrator, Responses};
use crate::registry::{RegistrySettings, SessionRegistry};
use crate::session::resolve_credentials;
use crate::transport::WebDriverFactory;
use sdk::{AuthError, ChorusErrorExt};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// List the endpoint kinds known to this configuration
pub async fn handle_kinds(config: &Config, format: OutputFormat) -> Result<()> {
    let catalog = config.catalog();

    match format {
        OutputFormat::Json => {
            let kinds: Vec<Value> = catalog
                .iter()
                .map(|(kind, profile)| {
                    json!({
                        "kind": kind,
                        "name": profile.name,
                        "url": profile.url,
                        "login": profile.requires_login(),
                        "capabilities": profile.capabilities(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&kinds)?);
        }
        OutputFormat::Text => {
            println!("Known endpoint kinds ({}):", catalog.len());
            println!();
            for (kind, profile) in catalog.iter() {
                let caps = profile.capabilities();
                println!("  {:<12} {}", kind, profile.url);
                println!(
                    "               regenerate: {}, reset: {}, login: {}",
                    yes_no(caps.supports_regenerate),
                    yes_no(caps.supports_reset),
                    yes_no(profile.requires_login())
                );
            }
        }
    }
    Ok(())
}

/// Validate the configuration and report what would be started
pub async fn handle_check(config: &Config, format: OutputFormat) -> Result<()> {
    let specs = config.session_specs()?;
    let mut issues = Vec::new();
    let mut sessions = Vec::new();

    for spec in &specs {
        let credentials = match resolve_credentials(&spec.profile, &spec.options) {
            Ok(Some(_)) => "found".to_string(),
            Ok(None) if !spec.profile.requires_login() || spec.options.skip_login() => {
                "not needed".to_string()
            }
            Ok(None) => "missing (login skipped)".to_string(),
            Err(AuthError::MissingCredentials { uname_var, pwd_var }) => {
                issues.push(format!("{}: set {} and {}", spec.tag, uname_var, pwd_var));
                format!("missing ({} / {})", uname_var, pwd_var)
            }
            Err(e) => {
                issues.push(format!("{}: {}", spec.tag, e));
                "invalid".to_string()
            }
        };
        sessions.push((spec, credentials));
    }

    if specs.is_empty() {
        issues.push("No sessions configured. Add [[sessions]] entries to config.toml".to_string());
    }

    match format {
        OutputFormat::Json => {
            let sessions: Vec<Value> = sessions
                .iter()
                .map(|(spec, credentials)| {
                    json!({
                        "tag": spec.tag,
                        "kind": spec.kind,
                        "url": spec.profile.url,
                        "credentials": credentials,
                    })
                })
                .collect();
            let output = json!({
                "webdriver": config.webdriver.url,
                "sessions": sessions,
                "issues": issues,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("WebDriver: {}", config.webdriver.url);
            println!("Sessions ({}):", specs.len());
            for (spec, credentials) in &sessions {
                println!("  {:<16} {:<12} credentials: {}", spec.tag, spec.kind, credentials);
            }
            if issues.is_empty() {
                println!("\nConfiguration OK.");
            } else {
                println!("\nIssues:");
                for issue in &issues {
                    println!("  - {}", issue);
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} issue(s) found", issues.len())
    }
}

pub async fn handle_ask(config: &Config, tag: &str, prompt: &str, format: OutputFormat) -> Result<()> {
    let orchestrator = start_swarm(config).await?;
    let result = orchestrator.interact(tag, prompt).await;
    orchestrator.teardown().await;

    let mut responses = Responses::new();
    responses.insert(tag.to_string(), result);
    print_responses(None, &responses, format)
}

pub async fn handle_broadcast(
    config: &Config,
    prompt: &str,
    exclude: &[String],
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = start_swarm(config).await?;
    let exclude: Vec<&str> = exclude.iter().map(String::as_str).collect();
    let responses = orchestrator.broadcast(prompt, &exclude).await;
    orchestrator.teardown().await;

    print_responses(None, &responses, format)
}

pub async fn handle_aggregate(
    config: &Config,
    prompt: &str,
    aggregators: &[String],
    agg_prompt: &str,
    options: AggregateOptions,
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = start_swarm(config).await?;
    let aggregators: Vec<&str> = aggregators.iter().map(String::as_str).collect();
    let (responses, verdicts) = orchestrator
        .broadcast_and_aggregate(prompt, &aggregators, agg_prompt, options)
        .await;
    orchestrator.teardown().await;

    print_stages(&responses, "aggregation", &verdicts, format)
}

pub async fn handle_vote(config: &Config, prompt: &str, voting_prompt: &str, format: OutputFormat) -> Result<()> {
    let orchestrator = start_swarm(config).await?;
    let (responses, votes) = orchestrator.broadcast_and_vote(prompt, voting_prompt).await;
    orchestrator.teardown().await;

    print_stages(&responses, "votes", &votes, format)
}

pub async fn handle_converse(
    config: &Config,
    intro1: &str,
    intro2: &str,
    rounds: usize,
    use_response1: bool,
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = start_swarm(config).await?;
    let exchanges = converse(&orchestrator, intro1, intro2, rounds, use_response1).await;
    orchestrator.teardown().await;
    let (heads, exchanges) = exchanges?;

    match format {
        OutputFormat::Json => {
            let (h1, h2) = (heads.0.as_str(), heads.1.as_str());
            let turns: Vec<Value> = exchanges
                .iter()
                .map(|(r1, r2)| json!({ h1: r1, h2: r2 }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&turns)?);
        }
        OutputFormat::Text => {
            for (round, (r1, r2)) in exchanges.iter().enumerate() {
                println!("--- round {} ---", round);
                println!("[{}] {}", heads.0, r1);
                println!("[{}] {}", heads.1, r2);
            }
        }
    }
    Ok(())
}

type Exchanges = ((String, String), Vec<(String, String)>);

async fn converse(
    orchestrator: &Orchestrator,
    intro1: &str,
    intro2: &str,
    rounds: usize,
    use_response1: bool,
) -> Result<Exchanges> {
    let mut driver = ConversationDriver::new(orchestrator)?;
    let heads = {
        let (h1, h2) = driver.heads();
        (h1.to_string(), h2.to_string())
    };

    let mut exchanges = vec![driver.start(intro1, intro2, use_response1).await?];
    for _ in 0..rounds {
        exchanges.push(driver.continue_turn(None, None).await?);
    }
    Ok((heads, exchanges))
}

pub async fn handle_reset(config: &Config, tags: &[String], format: OutputFormat) -> Result<()> {
    let orchestrator = start_swarm(config).await?;
    let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
    let target = (!tags.is_empty()).then_some(tags.as_slice());
    let status = orchestrator.reset_many(target).await;
    orchestrator.teardown().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => {
            for (tag, ok) in &status {
                println!("[{}] {}", tag, if *ok { "reset" } else { "not reset" });
            }
        }
    }
    Ok(())
}

/// Build the configured swarm on the configured WebDriver endpoint
///
/// Sessions that fail to start are reported and left out. Fails only when
/// no session is usable.
async fn start_swarm(config: &Config) -> Result<Orchestrator> {
    let specs = config.session_specs()?;
    anyhow::ensure!(!specs.is_empty(), "No sessions configured");

    let factory = WebDriverFactory::new(&config.webdriver).context("Failed to set up WebDriver client")?;
    let registry =
        SessionRegistry::build(specs, Arc::new(factory), RegistrySettings::from(&config.swarm)).await;

    for line in registry.failure_report() {
        eprintln!("warning: {}", line);
    }
    anyhow::ensure!(!registry.is_empty(), "No session could be started");

    Ok(Orchestrator::from_config(Arc::new(registry), &config.swarm))
}

fn responses_json(responses: &Responses) -> Value {
    let entries = responses
        .iter()
        .map(|(tag, result)| {
            let value = match result {
                Ok(response) => json!({ "response": response }),
                Err(e) => json!({ "error": e.to_string(), "hint": e.user_hint() }),
            };
            (tag.clone(), value)
        })
        .collect();
    Value::Object(entries)
}

fn print_responses_text(responses: &Responses) {
    for (tag, result) in responses {
        match result {
            Ok(response) => println!("[{}] {}", tag, response),
            Err(e) => println!("[{}] error: {} ({})", tag, e, e.user_hint()),
        }
    }
}

fn print_responses(label: Option<&str>, responses: &Responses, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&responses_json(responses))?),
        OutputFormat::Text => {
            if let Some(label) = label {
                println!("--- {} ---", label);
            }
            print_responses_text(responses);
        }
    }
    Ok(())
}

fn print_stages(responses: &Responses, label: &str, verdicts: &Responses, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = json!({
                "responses": responses_json(responses),
                label: responses_json(verdicts),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        OutputFormat::Text => {
            print_responses(Some("responses"), responses, format)?;
            print_responses(Some(label), verdicts, format)
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
