//! reqflow CLI entry point.
//!
//! Binary name: `rqf`
//!
//! Parses arguments, initializes tracing, the database and services, then
//! dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    reqflow_observe::tracing_setup::init_tracing(
        cli.log_filter(),
        reqflow_observe::tracing_setup::otel_requested(),
    )
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "rqf", &mut std::io::stdout());
        return Ok(());
    }

    let result = run(cli).await;
    reqflow_observe::tracing_setup::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init().await?;

    match cli.command {
        Commands::Flow { action } => cli::flow::handle_flow_command(action, &state, cli.json).await,
        Commands::Example { action } => {
            cli::example::handle_example_command(action, &state, cli.json).await
        }
        Commands::Status => cli::status::status(&state, cli.json),
        Commands::Completions { .. } => Ok(()),
    }
}
