// Pilot Engine
// Main entry point for the pilot binary

use clap::Parser;
use pilot_engine::cli::{Cli, Command};
use pilot_engine::config::Config;
use pilot_engine::handlers::{
    handle_history, handle_providers, handle_replay, handle_run, OutputFormat, RunOptions,
};
use pilot_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    tracing::info!("Pilot Engine v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run {
            description,
            provider,
            model,
            priority,
            context_window,
        } => {
            tracing::info!("Executing task: {}", description);
            let options = RunOptions {
                description,
                provider,
                model,
                priority,
                context_window,
            };
            handle_run(options, &config, format).await
        }

        Command::History { limit } => {
            tracing::info!("Showing last {} tasks", limit);
            handle_history(limit, &config, format).await
        }

        Command::Replay { task_id } => {
            tracing::info!("Replaying task: {}", task_id);
            handle_replay(task_id, &config, format).await
        }

        Command::Providers => handle_providers(&config, format),
    }
}
