//! CLI flow subcommands: list, run, history and clear.

use std::time::Duration;

use anyhow::{Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use reqflow_core::flow::service::RunOptions;
use reqflow_types::execution::{ExecutionState, FlowState, FlowStatusEvent, NodeStatusEvent};
use reqflow_types::flow::ExecutionMode;
use reqflow_types::id::Id;

use super::service_error;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum FlowCommand {
    /// List the flows of a workspace.
    List {
        /// Workspace ID.
        #[arg(long)]
        workspace: Id,
    },

    /// Run a flow and stream node status.
    Run {
        /// Flow ID.
        flow_id: Id,

        /// Environment whose variables apply on top of the global one.
        #[arg(long)]
        env: Option<Id>,

        /// Scheduling mode: auto, single or multi.
        #[arg(long, default_value = "auto")]
        mode: ExecutionMode,

        /// Timeout in milliseconds, capped by the flow's own timeout.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Show journaled executions of a node, newest first.
    History {
        /// Node ID.
        node_id: Id,

        /// Maximum number of rows.
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Delete every journaled execution of a flow's nodes.
    Clear {
        /// Flow ID.
        flow_id: Id,
    },
}

pub async fn handle_flow_command(cmd: FlowCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        FlowCommand::List { workspace } => handle_list(&workspace, state, json).await,
        FlowCommand::Run {
            flow_id,
            env,
            mode,
            timeout_ms,
        } => {
            let options = RunOptions {
                environment_id: env,
                mode,
                timeout: timeout_ms.map(Duration::from_millis),
            };
            handle_run(&flow_id, &options, state, json).await
        }
        FlowCommand::History { node_id, limit } => handle_history(&node_id, limit, state, json).await,
        FlowCommand::Clear { flow_id } => handle_clear(&flow_id, state, json).await,
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(workspace_id: &Id, state: &AppState, json: bool) -> Result<()> {
    let flows = state
        .flow_service
        .list_flows(workspace_id)
        .await
        .map_err(|e| service_error("failed to list flows", e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&flows)?);
        return Ok(());
    }

    if flows.is_empty() {
        println!();
        println!("  No flows in workspace {workspace_id}.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("ID"),
            Cell::new("Timeout"),
            Cell::new("Updated"),
        ]);

    for flow in &flows {
        let timeout = flow
            .timeout_ms
            .map(|ms| format!("{ms} ms"))
            .unwrap_or_else(|| format!("{} s (default)", state.config.flow_timeout_secs));
        table.add_row(vec![
            Cell::new(&flow.name),
            Cell::new(flow.id),
            Cell::new(timeout),
            Cell::new(flow.updated_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

async fn handle_run(flow_id: &Id, options: &RunOptions, state: &AppState, json: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, canceling flow");
                cancel.cancel();
            }
        })
    };

    let (node_tx, node_rx) = mpsc::channel(64);
    let (flow_tx, flow_rx) = mpsc::channel(8);

    if !json {
        println!();
        println!("  {} Running flow {}", style("▶").cyan().bold(), style(flow_id).dim());
        println!();
    }

    let (outcome, (nodes, flows)) = tokio::join!(
        state
            .flow_service
            .run(flow_id, options, &cancel, Some(node_tx), Some(flow_tx)),
        collect_events(node_rx, flow_rx, json),
    );
    ctrl_c.abort();
    let outcome = outcome.map_err(|e| service_error("flow run failed", e))?;

    if json {
        let out = serde_json::json!({
            "flow_id": flow_id,
            "state": outcome.state,
            "error": outcome.error,
            "dropped_events": outcome.dropped_events,
            "nodes": nodes,
            "flow_events": flows,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  Flow finished: {}",
            flow_state_style(outcome.state)
        );
        if let Some(err) = &outcome.error {
            println!("  {}", style(err).red());
        }
        if outcome.dropped_events > 0 {
            println!(
                "  {}",
                style(format!("{} status updates dropped", outcome.dropped_events)).dim()
            );
        }
        println!();
    }

    if outcome.state != FlowState::Success {
        bail!("flow finished with state {}", outcome.state);
    }
    Ok(())
}

/// Drain both status channels, printing node transitions unless `json`.
async fn collect_events(
    mut node_rx: mpsc::Receiver<NodeStatusEvent>,
    mut flow_rx: mpsc::Receiver<FlowStatusEvent>,
    json: bool,
) -> (Vec<NodeStatusEvent>, Vec<FlowStatusEvent>) {
    let mut nodes = Vec::new();
    let mut flows = Vec::new();
    let mut nodes_open = true;
    let mut flows_open = true;

    while nodes_open || flows_open {
        tokio::select! {
            event = node_rx.recv(), if nodes_open => match event {
                Some(event) => {
                    if !json {
                        print_node_event(&event);
                    }
                    nodes.push(event);
                }
                None => nodes_open = false,
            },
            event = flow_rx.recv(), if flows_open => match event {
                Some(event) => flows.push(event),
                None => flows_open = false,
            },
        }
    }
    (nodes, flows)
}

fn print_node_event(event: &NodeStatusEvent) {
    let marker = match event.state {
        ExecutionState::Running => style("…").dim(),
        ExecutionState::Success => style("✓").green(),
        ExecutionState::Failure => style("✗").red(),
        ExecutionState::Canceled => style("-").yellow(),
    };
    let iteration = event
        .iteration
        .map(|i| format!(" [{i}]"))
        .unwrap_or_default();
    let line = format!("  {marker} {}{iteration} {}", event.name, style(event.state).dim());
    match &event.error {
        Some(err) => println!("{line}  {}", style(err).red()),
        None => println!("{line}"),
    }
}

fn flow_state_style(state: FlowState) -> console::StyledObject<FlowState> {
    match state {
        FlowState::Success => style(state).green().bold(),
        FlowState::Running => style(state).cyan(),
        FlowState::Canceled | FlowState::Timeout => style(state).yellow().bold(),
        FlowState::Failure => style(state).red().bold(),
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

async fn handle_history(node_id: &Id, limit: Option<u32>, state: &AppState, json: bool) -> Result<()> {
    let rows = state
        .flow_service
        .history(node_id, limit)
        .await
        .map_err(|e| service_error("failed to load history", e))?;

    if json {
        let out: Vec<_> = rows
            .iter()
            .map(|(row, payload)| {
                serde_json::json!({
                    "id": row.id,
                    "node_id": row.node_id,
                    "name": row.name,
                    "state": row.state,
                    "error": row.error,
                    "response_id": row.response_id,
                    "completed_at": row.completed_at.map(|t| t.to_rfc3339()),
                    "input_compression": row.input_compression,
                    "output_compression": row.output_compression,
                    "input": payload.input,
                    "output": payload.output,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!();
        println!("  No executions recorded for node {node_id}.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Execution").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("State"),
            Cell::new("Completed"),
            Cell::new("Stored"),
            Cell::new("Error"),
        ]);

    for (row, _) in &rows {
        let state_color = match row.state {
            ExecutionState::Success => Color::Green,
            ExecutionState::Failure => Color::Red,
            ExecutionState::Canceled => Color::Yellow,
            ExecutionState::Running => Color::Cyan,
        };
        table.add_row(vec![
            Cell::new(row.id),
            Cell::new(&row.name),
            Cell::new(row.state).fg(state_color),
            Cell::new(
                row.completed_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(format!(
                "{} B {} / {} B {}",
                row.input_data.len(),
                row.input_compression.as_str(),
                row.output_data.len(),
                row.output_compression.as_str()
            )),
            Cell::new(row.error.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Clear
// ---------------------------------------------------------------------------

async fn handle_clear(flow_id: &Id, state: &AppState, json: bool) -> Result<()> {
    let deleted = state
        .flow_service
        .clear_history(flow_id)
        .await
        .map_err(|e| service_error("failed to clear history", e))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "flow_id": flow_id,
                "deleted": deleted,
            }))?
        );
    } else {
        println!();
        println!(
            "  {} Deleted {} execution rows for flow {}",
            style("✓").green().bold(),
            deleted,
            style(flow_id).dim()
        );
        println!();
    }
    Ok(())
}
