//! Infrastructure layer for reqflow.
//!
//! Contains implementations of the ports defined in `reqflow-core`: SQLite
//! storage for workspaces, requests, overlays, flows and the node journal,
//! a reqwest-backed HTTP client, and the `config.toml` loader.

pub mod config;
pub mod http;
pub mod sqlite;
