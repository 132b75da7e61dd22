//! CLI example subcommands: run, resolve, duplicate, and the delta editors
//! for key/value rows (`overlay`) and assertions (`assertion`).

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use reqflow_core::delta::resolver::ResolvedRequest;
use reqflow_core::example::ExampleRunResult;
use reqflow_types::id::Id;
use reqflow_types::list::MovePosition;
use reqflow_types::overlay::{ItemSource, MergedAssertion, MergedItem, OverlayScope};
use reqflow_types::request::{KeyValueOverrides, KvFamily};

use super::service_error;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ExampleCommand {
    /// Send an example, optionally through a delta, and check its assertions.
    Run {
        /// Example ID.
        example_id: Id,

        /// Delta example whose overrides apply on top.
        #[arg(long)]
        delta: Option<Id>,

        /// Environment whose variables apply on top of the global one.
        #[arg(long)]
        env: Option<Id>,
    },

    /// Show the merged view of an example without sending it.
    Resolve {
        /// Example ID.
        example_id: Id,

        /// Delta example whose overrides apply on top.
        #[arg(long)]
        delta: Option<Id>,
    },

    /// Copy an example under a new name.
    Duplicate {
        /// Example ID.
        example_id: Id,

        /// Name of the copy.
        #[arg(long)]
        name: String,
    },

    /// Edit a delta example's key/value rows on top of its origin.
    Overlay {
        #[command(subcommand)]
        action: OverlayCommand,
    },

    /// List and edit assertions; origin edits reach every delta copy.
    Assertion {
        #[command(subcommand)]
        action: AssertionCommand,
    },
}

/// Delta example and key/value family an overlay command works on.
#[derive(Args, Debug, Clone)]
pub struct OverlayTarget {
    /// Delta example ID.
    pub delta_id: Id,

    /// header, search_param, body_form or body_urlencoded.
    #[arg(long, default_value = "header")]
    pub family: KvFamily,
}

impl OverlayTarget {
    fn scope(&self) -> OverlayScope {
        OverlayScope::new(self.delta_id, self.family)
    }
}

#[derive(Subcommand)]
pub enum OverlayCommand {
    /// Show the merged rows in order.
    List {
        #[command(flatten)]
        target: OverlayTarget,
    },

    /// Add a delta-only row at the end.
    Add {
        #[command(flatten)]
        target: OverlayTarget,

        #[arg(long)]
        key: String,

        #[arg(long, default_value = "")]
        value: String,

        #[arg(long)]
        description: Option<String>,

        /// Add the row disabled.
        #[arg(long)]
        disabled: bool,
    },

    /// Change a row. On origin rows, fields not given fall back to the origin.
    Set {
        #[command(flatten)]
        target: OverlayTarget,

        item_id: Id,

        #[arg(long)]
        key: Option<String>,

        #[arg(long)]
        value: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        enabled: Option<bool>,
    },

    /// Place a row before or after another one.
    Move {
        #[command(flatten)]
        target: OverlayTarget,

        item_id: Id,

        /// Row to move next to.
        anchor_id: Id,

        #[arg(long, default_value = "after")]
        position: MovePosition,
    },

    /// Drop a row's edits.
    Reset {
        #[command(flatten)]
        target: OverlayTarget,

        item_id: Id,
    },

    /// Remove a delta-only row or hide an origin row.
    Delete {
        #[command(flatten)]
        target: OverlayTarget,

        item_id: Id,
    },

    /// Show a hidden origin row again.
    Undelete {
        #[command(flatten)]
        target: OverlayTarget,

        item_id: Id,
    },
}

#[derive(Subcommand)]
pub enum AssertionCommand {
    /// Show an example's assertions, merged with a delta's when given.
    List {
        /// Origin example ID.
        example_id: Id,

        #[arg(long)]
        delta: Option<Id>,
    },

    /// Change an origin assertion and its delta copies.
    Set {
        /// Origin example ID.
        example_id: Id,

        assertion_id: Id,

        #[arg(long)]
        expression: String,

        #[arg(long)]
        disabled: bool,

        /// Default delta holding unlinked copies (repeatable).
        #[arg(long = "delta")]
        deltas: Vec<Id>,
    },

    /// Delete an origin assertion and its delta copies.
    Delete {
        /// Origin example ID.
        example_id: Id,

        assertion_id: Id,

        /// Default delta holding unlinked copies (repeatable).
        #[arg(long = "delta")]
        deltas: Vec<Id>,
    },
}

pub async fn handle_example_command(
    cmd: ExampleCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        ExampleCommand::Run {
            example_id,
            delta,
            env,
        } => handle_run(&example_id, delta.as_ref(), env.as_ref(), state, json).await,
        ExampleCommand::Resolve { example_id, delta } => {
            handle_resolve(&example_id, delta.as_ref(), state, json).await
        }
        ExampleCommand::Duplicate { example_id, name } => {
            handle_duplicate(&example_id, &name, state, json).await
        }
        ExampleCommand::Overlay { action } => handle_overlay(action, state, json).await,
        ExampleCommand::Assertion { action } => handle_assertion(action, state, json).await,
    }
}

async fn handle_run(
    example_id: &Id,
    delta: Option<&Id>,
    env: Option<&Id>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let result = state
        .example_service
        .run(example_id, delta, env)
        .await
        .map_err(|e| service_error("example run failed", e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_run(&result);
    }

    if !result.passed() {
        let failed = result.assertions.iter().filter(|a| !a.passed).count();
        bail!("{failed} assertion(s) failed");
    }
    Ok(())
}

fn print_run(result: &ExampleRunResult) {
    let status = result.response.status;
    let status_style = match status {
        200..=299 => style(status).green().bold(),
        300..=399 => style(status).cyan().bold(),
        _ => style(status).red().bold(),
    };

    println!();
    println!(
        "  {} {}",
        style(&result.request.method).bold(),
        style(&result.request.url).cyan()
    );
    println!(
        "  {} {}",
        status_style,
        style(format!("{} ms, {} bytes", result.response.duration_ms, result.response.body.len())).dim()
    );

    if !result.assertions.is_empty() {
        println!();
        for assertion in &result.assertions {
            let mark = if assertion.passed {
                style("✓").green()
            } else {
                style("✗").red()
            };
            match &assertion.error {
                Some(err) => println!("  {mark} {}  {}", assertion.expression, style(err).red()),
                None => println!("  {mark} {}", assertion.expression),
            }
        }
    }

    let body = String::from_utf8_lossy(&result.response.body);
    if !body.is_empty() {
        println!();
        let pretty = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| serde_json::to_string_pretty(&v).ok());
        for line in pretty.as_deref().unwrap_or(&body).lines() {
            println!("  {line}");
        }
    }
    println!();
}

async fn handle_resolve(
    example_id: &Id,
    delta: Option<&Id>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let resolved = state
        .example_service
        .resolve(example_id, delta)
        .await
        .map_err(|e| service_error("failed to resolve example", e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }

    print_resolved(&resolved);
    Ok(())
}

fn print_resolved(resolved: &ResolvedRequest) {
    println!();
    println!(
        "  {} {}",
        style(&resolved.endpoint.method).bold(),
        style(&resolved.endpoint.url).cyan()
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Kind").fg(Color::Cyan),
            Cell::new("Key"),
            Cell::new("Value"),
            Cell::new("Enabled"),
        ]);

    let families = [
        ("header", &resolved.headers),
        ("query", &resolved.search_params),
        ("form", &resolved.body_form),
        ("urlencoded", &resolved.body_urlencoded),
    ];
    for (label, rows) in families {
        for kv in rows {
            table.add_row(vec![
                Cell::new(label),
                Cell::new(&kv.key),
                Cell::new(&kv.value),
                Cell::new(if kv.enabled { "yes" } else { "no" }),
            ]);
        }
    }
    for assertion in &resolved.assertions {
        table.add_row(vec![
            Cell::new("assert"),
            Cell::new(""),
            Cell::new(&assertion.expression),
            Cell::new(if assertion.enabled { "yes" } else { "no" }),
        ]);
    }

    println!("{table}");
    if let Some(raw) = &resolved.body_raw {
        println!(
            "  {}",
            style(format!(
                "raw body: {} bytes ({})",
                raw.data.len(),
                raw.content_type.as_deref().unwrap_or("no content type")
            ))
            .dim()
        );
    }
    println!();
}

async fn handle_duplicate(example_id: &Id, name: &str, state: &AppState, json: bool) -> Result<()> {
    let copy = state
        .example_service
        .duplicate(example_id, name)
        .await
        .map_err(|e| service_error("failed to duplicate example", e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&copy)?);
    } else {
        println!();
        println!(
            "  {} Created example '{}' ({})",
            style("✓").green().bold(),
            style(&copy.name).cyan(),
            copy.id
        );
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Overlay
// ---------------------------------------------------------------------------

async fn handle_overlay(cmd: OverlayCommand, state: &AppState, json: bool) -> Result<()> {
    let overlay = &state.overlay_service;
    let (target, done) = match cmd {
        OverlayCommand::List { target } => {
            let items = overlay
                .list(&target.scope())
                .await
                .map_err(|e| service_error("failed to list overlay", e.into()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                print_overlay(&target, &items);
            }
            return Ok(());
        }
        OverlayCommand::Add {
            target,
            key,
            value,
            description,
            disabled,
        } => {
            let scope = target.scope();
            let id = overlay
                .create_delta(&scope)
                .await
                .map_err(|e| service_error("failed to add row", e.into()))?;
            let values = KeyValueOverrides {
                key: Some(key),
                value: Some(value),
                description,
                enabled: Some(!disabled),
            };
            overlay
                .update(&scope, &id, &values)
                .await
                .map_err(|e| service_error("failed to add row", e.into()))?;
            (target, format!("Added row {id}"))
        }
        OverlayCommand::Set {
            target,
            item_id,
            key,
            value,
            description,
            enabled,
        } => {
            let values = KeyValueOverrides {
                key,
                value,
                description,
                enabled,
            };
            overlay
                .update(&target.scope(), &item_id, &values)
                .await
                .map_err(|e| service_error("failed to update row", e.into()))?;
            (target, format!("Updated row {item_id}"))
        }
        OverlayCommand::Move {
            target,
            item_id,
            anchor_id,
            position,
        } => {
            overlay
                .move_item(&target.scope(), &item_id, &anchor_id, position)
                .await
                .map_err(|e| service_error("failed to move row", e.into()))?;
            (target, format!("Moved row {item_id}"))
        }
        OverlayCommand::Reset { target, item_id } => {
            overlay
                .reset(&target.scope(), &item_id)
                .await
                .map_err(|e| service_error("failed to reset row", e.into()))?;
            (target, format!("Reset row {item_id}"))
        }
        OverlayCommand::Delete { target, item_id } => {
            overlay
                .delete(&target.scope(), &item_id)
                .await
                .map_err(|e| service_error("failed to delete row", e.into()))?;
            (target, format!("Deleted row {item_id}"))
        }
        OverlayCommand::Undelete { target, item_id } => {
            overlay
                .undelete(&target.scope(), &item_id)
                .await
                .map_err(|e| service_error("failed to restore row", e.into()))?;
            (target, format!("Restored row {item_id}"))
        }
    };

    if json {
        let items = overlay
            .list(&target.scope())
            .await
            .map_err(|e| service_error("failed to list overlay", e.into()))?;
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        println!();
        println!("  {} {done}", style("✓").green().bold());
        println!();
    }
    Ok(())
}

fn source_cell(source: ItemSource) -> Cell {
    let color = match source {
        ItemSource::Origin => Color::White,
        ItemSource::Mixed => Color::Yellow,
        ItemSource::Delta => Color::Green,
    };
    Cell::new(source.as_str()).fg(color)
}

fn print_overlay(target: &OverlayTarget, items: &[MergedItem]) {
    if items.is_empty() {
        println!();
        println!(
            "  No {} rows for example {}.",
            target.family.as_str(),
            target.delta_id
        );
        println!();
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Key"),
            Cell::new("Value"),
            Cell::new("Enabled"),
            Cell::new("Source"),
        ]);
    for item in items {
        table.add_row(vec![
            Cell::new(item.id),
            Cell::new(&item.fields.key),
            Cell::new(&item.fields.value),
            Cell::new(if item.fields.enabled { "yes" } else { "no" }),
            source_cell(item.source),
        ]);
    }

    println!();
    println!("{table}");
    println!();
}

// ---------------------------------------------------------------------------
// Assertions
// ---------------------------------------------------------------------------

async fn handle_assertion(cmd: AssertionCommand, state: &AppState, json: bool) -> Result<()> {
    let assertions = &state.assertion_service;
    match cmd {
        AssertionCommand::List { example_id, delta } => {
            let merged = assertions
                .load_effective(&example_id, delta.as_ref())
                .await
                .map_err(|e| service_error("failed to load assertions", e.into()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&merged)?);
            } else {
                print_assertions(&merged);
            }
        }
        AssertionCommand::Set {
            example_id,
            assertion_id,
            expression,
            disabled,
            deltas,
        } => {
            let deltas = delta_targets(state, &example_id, deltas).await?;
            let updated = assertions
                .apply_update(&example_id, &deltas, &assertion_id, &expression, !disabled)
                .await
                .map_err(|e| service_error("failed to update assertion", e.into()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&updated)?);
            } else {
                println!();
                println!(
                    "  {} Updated assertion {} across {} delta(s)",
                    style("✓").green().bold(),
                    updated.id,
                    deltas.len()
                );
                println!();
            }
        }
        AssertionCommand::Delete {
            example_id,
            assertion_id,
            deltas,
        } => {
            let deltas = delta_targets(state, &example_id, deltas).await?;
            assertions
                .apply_delete(&example_id, &deltas, &assertion_id)
                .await
                .map_err(|e| service_error("failed to delete assertion", e.into()))?;
            if json {
                println!("{}", serde_json::json!({ "deleted": assertion_id }));
            } else {
                println!();
                println!(
                    "  {} Deleted assertion {assertion_id}",
                    style("✓").green().bold()
                );
                println!();
            }
        }
    }
    Ok(())
}

/// Version deltas of the origin followed by any extra deltas named on the command line.
async fn delta_targets(state: &AppState, origin_id: &Id, extra: Vec<Id>) -> Result<Vec<Id>> {
    let mut deltas = state
        .assertion_service
        .version_deltas(origin_id)
        .await
        .map_err(|e| service_error("failed to list deltas", e.into()))?;
    for id in extra {
        if !deltas.contains(&id) {
            deltas.push(id);
        }
    }
    Ok(deltas)
}

fn print_assertions(merged: &[MergedAssertion]) {
    if merged.is_empty() {
        println!();
        println!("  No assertions.");
        println!();
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Expression"),
            Cell::new("Enabled"),
            Cell::new("Source"),
        ]);
    for assertion in merged {
        table.add_row(vec![
            Cell::new(assertion.id),
            Cell::new(&assertion.expression),
            Cell::new(if assertion.enabled { "yes" } else { "no" }),
            source_cell(assertion.source),
        ]);
    }

    println!();
    println!("{table}");
    println!();
}
