//! CLI interface for Pilot
//!
//! Commands and global flags, defined with clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pilot desktop agent
///
/// Plans and drives desktop automation tasks through an LLM provider and
/// the actuation endpoint.
#[derive(Parser, Debug)]
#[command(name = "pilot")]
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
    /// Run a task until it finishes, fails or needs help
    Run {
        /// What the agent should do
        description: String,

        /// Provider key (anthropic, openai, google, proxy)
        #[arg(long)]
        provider: Option<String>,

        /// Model name understood by the provider
        #[arg(long)]
        model: Option<String>,

        /// Task priority (low, medium, high, urgent)
        #[arg(long, default_value = "medium")]
        priority: String,

        /// Context window of the model in tokens
        #[arg(long)]
        context_window: Option<u64>,
    },

    /// Show task history
    History {
        /// Number of tasks to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show the plan and full message log of a task
    Replay {
        /// Task ID to replay
        task_id: String,
    },

    /// List LLM providers and whether their API keys are set
    Providers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_with_flags() {
        let cli = Cli::try_parse_from([
            "pilot",
            "--json",
            "run",
            "open the calculator",
            "--provider",
            "openai",
            "--priority",
            "high",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Command::Run {
                description,
                provider,
                model,
                priority,
                context_window,
            } => {
                assert_eq!(description, "open the calculator");
                assert_eq!(provider.as_deref(), Some("openai"));
                assert!(model.is_none());
                assert_eq!(priority, "high");
                assert!(context_window.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_history_default_limit() {
        let cli = Cli::try_parse_from(["pilot", "history"]).unwrap();
        assert!(matches!(cli.command, Command::History { limit: 10 }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pilot", "providers", "--log", "debug"]).unwrap();
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Providers));
    }
}
