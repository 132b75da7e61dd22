//! CLI command definitions for the `rqf` binary.
//!
//! Uses clap derive macros. Commands follow a noun-verb pattern
//! (`rqf flow run <id>`, `rqf example run <id>`).

pub mod example;
pub mod flow;
pub mod status;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use reqflow_core::service::ServiceError;

/// Run API flows and examples.
#[derive(Parser)]
#[command(name = "rqf", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List, run and inspect flows.
    Flow {
        #[command(subcommand)]
        action: flow::FlowCommand,
    },

    /// Run, resolve, duplicate and edit examples and their deltas.
    Example {
        #[command(subcommand)]
        action: example::ExampleCommand,
    },

    /// Show data directory and effective configuration.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

impl Cli {
    /// Default log filter for the chosen verbosity. `RUST_LOG` overrides it.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info,reqflow_core=debug,reqflow_infra=debug",
            _ => "trace",
        }
    }
}

/// Convert a service error for display, logging the full detail when the
/// kind is not user-visible.
pub fn service_error(context: &str, err: ServiceError) -> anyhow::Error {
    let kind = err.kind();
    let detail = err.to_string();
    if kind.is_redacted() {
        tracing::error!(error = %detail, kind = %kind, "{context}");
    }
    anyhow::anyhow!("{context}: {}", kind.public_message(&detail))
}
