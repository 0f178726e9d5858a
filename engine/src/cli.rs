//! CLI interface for Chorus
//!
//! Every command except `kinds` and `check` starts the configured swarm,
//! runs one operation and tears the swarm down again.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chorus multi-endpoint conversational swarm
///
/// Drives several browser-based chat endpoints at once: broadcast a prompt,
/// let some endpoints judge the others' answers, or let two endpoints talk.
#[derive(Parser, Debug)]
#[command(name = "chorus")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the known endpoint kinds and their capabilities
    Kinds,

    /// Validate the configuration and show the resolved sessions
    Check,

    /// Send one prompt to one session
    Ask {
        /// Session tag
        #[arg(long)]
        tag: String,

        prompt: String,
    },

    /// Send a prompt to every session
    Broadcast {
        prompt: String,

        /// Session tags to leave out
        #[arg(long, value_name = "TAG")]
        exclude: Vec<String>,
    },

    /// Broadcast, then let aggregator sessions judge the answers
    Aggregate {
        prompt: String,

        /// Aggregator session tags
        #[arg(long = "agg", value_name = "TAG", required = true)]
        aggregators: Vec<String>,

        /// Instruction sent to the aggregators with the answers
        #[arg(long)]
        agg_prompt: String,

        /// Let aggregators answer the broadcast too
        #[arg(long)]
        include_aggregators: bool,

        /// Keep the aggregators' conversations instead of resetting them
        #[arg(long)]
        no_reset: bool,
    },

    /// Broadcast, then let every session vote on all answers
    Vote {
        prompt: String,

        /// Voting instruction sent with the answers
        #[arg(long)]
        voting_prompt: String,
    },

    /// Let the two configured sessions talk to each other
    Converse {
        /// Instruction for the first head
        #[arg(long)]
        intro1: String,

        /// Instruction for the second head
        #[arg(long)]
        intro2: String,

        /// Exchanges after the introduction
        #[arg(long, default_value = "1")]
        rounds: usize,

        /// Do not append the first answer to the second intro
        #[arg(long)]
        no_use_response: bool,
    },

    /// Start new conversations
    Reset {
        /// Session tags to reset (default: all)
        #[arg(long, value_name = "TAG")]
        tag: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["chorus", "--json", "--log", "debug", "--config", "/tmp/c.toml", "kinds"]);
        assert!(cli.json);
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(cli.command, Command::Kinds));
    }

    #[test]
    fn test_ask() {
        let cli = Cli::parse_from(["chorus", "ask", "--tag", "Pi", "hello there"]);
        if let Command::Ask { tag, prompt } = cli.command {
            assert_eq!(tag, "Pi");
            assert_eq!(prompt, "hello there");
        } else {
            panic!("Expected Ask command");
        }
    }

    #[test]
    fn test_broadcast_repeated_exclude() {
        let cli = Cli::parse_from(["chorus", "broadcast", "hi", "--exclude", "A", "--exclude", "B"]);
        if let Command::Broadcast { prompt, exclude } = cli.command {
            assert_eq!(prompt, "hi");
            assert_eq!(exclude, vec!["A", "B"]);
        } else {
            panic!("Expected Broadcast command");
        }
    }

    #[test]
    fn test_aggregate() {
        let cli = Cli::parse_from([
            "chorus",
            "aggregate",
            "pick a number",
            "--agg",
            "Claude",
            "--agg-prompt",
            "which is most common?",
            "--no-reset",
        ]);
        if let Command::Aggregate {
            prompt,
            aggregators,
            agg_prompt,
            include_aggregators,
            no_reset,
        } = cli.command
        {
            assert_eq!(prompt, "pick a number");
            assert_eq!(aggregators, vec!["Claude"]);
            assert_eq!(agg_prompt, "which is most common?");
            assert!(!include_aggregators);
            assert!(no_reset);
        } else {
            panic!("Expected Aggregate command");
        }
    }

    #[test]
    fn test_aggregate_requires_aggregator() {
        let result = Cli::try_parse_from(["chorus", "aggregate", "p", "--agg-prompt", "q"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_converse_defaults() {
        let cli = Cli::parse_from(["chorus", "converse", "--intro1", "a", "--intro2", "b"]);
        if let Command::Converse {
            rounds,
            no_use_response,
            ..
        } = cli.command
        {
            assert_eq!(rounds, 1);
            assert!(!no_use_response);
        } else {
            panic!("Expected Converse command");
        }
    }

    #[test]
    fn test_reset_all_by_default() {
        let cli = Cli::parse_from(["chorus", "reset"]);
        assert!(matches!(cli.command, Command::Reset { tag } if tag.is_empty()));
    }
}
