//! Status command: data directory and effective configuration.

use anyhow::Result;
use console::style;

use crate::state::AppState;

pub fn status(state: &AppState, json: bool) -> Result<()> {
    let config = &state.config;

    if json {
        let out = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "database": state.data_dir.join("reqflow.db").display().to_string(),
            "config": config,
            "workers": config.workers(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} reqflow v{}", style("▶").cyan().bold(), env!("CARGO_PKG_VERSION"));
    println!();
    println!("  {}", style("── Storage ──").dim());
    println!("  Data dir:   {}", state.data_dir.display());
    println!("  Database:   {}", state.data_dir.join("reqflow.db").display());
    println!();
    println!("  {}", style("── Engine ──").dim());
    println!("  Flow timeout:        {} s", config.flow_timeout_secs);
    println!("  HTTP timeout:        {} s", config.http_timeout_secs);
    println!("  Small flow limit:    {} nodes", config.small_flow_threshold);
    println!("  Workers:             {}", config.workers());
    println!("  Compress above:      {} bytes", config.compression_threshold_bytes);
    println!("  Status buffer/node:  {}", config.status_buffer_per_node);
    println!();

    Ok(())
}
