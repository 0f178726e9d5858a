// Chorus multi-endpoint conversational swarm
// Main entry point for the chorus binary

use clap::Parser;
use chorus_engine::cli::{Cli, Command};
use chorus_engine::config::Config;
use chorus_engine::handlers::{
    handle_aggregate, handle_ask, handle_broadcast, handle_check, handle_converse, handle_kinds,
    handle_reset, handle_vote, OutputFormat,
};
use chorus_engine::orchestrator::AggregateOptions;
use chorus_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = match &cli.config {
        Some(config_path) => Config::load_from_path(config_path),
        None => Config::load_or_create(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            init_telemetry();
            tracing::error!("{}", e);
            return Err(e.into());
        }
    };

    // --log wins over the config file; RUST_LOG wins over both
    let level = cli
        .log
        .clone()
        .unwrap_or_else(|| config.swarm.effective_log_level().to_string());
    init_telemetry_with_level(&level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");
    tracing::info!("Chorus v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Kinds => handle_kinds(&config, format).await,

        Command::Check => handle_check(&config, format).await,

        Command::Ask { tag, prompt } => {
            tracing::info!("Asking {}", tag);
            handle_ask(&config, &tag, &prompt, format).await
        }

        Command::Broadcast { prompt, exclude } => handle_broadcast(&config, &prompt, &exclude, format).await,

        Command::Aggregate {
            prompt,
            aggregators,
            agg_prompt,
            include_aggregators,
            no_reset,
        } => {
            let options = AggregateOptions {
                exclude_aggregators: !include_aggregators,
                reset_before: !no_reset,
            };
            handle_aggregate(&config, &prompt, &aggregators, &agg_prompt, options, format).await
        }

        Command::Vote { prompt, voting_prompt } => handle_vote(&config, &prompt, &voting_prompt, format).await,

        Command::Converse {
            intro1,
            intro2,
            rounds,
            no_use_response,
        } => handle_converse(&config, &intro1, &intro2, rounds, !no_use_response, format).await,

        Command::Reset { tag } => handle_reset(&config, &tag, format).await,
    }
}
