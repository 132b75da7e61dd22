//! Shared domain types for reqflow.
//!
//! This crate contains the domain model used across the workspace: identifiers,
//! rank keys, request content families, overlay rows, flow graphs, node
//! executions, configuration and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod execution;
pub mod flow;
pub mod id;
pub mod list;
pub mod overlay;
pub mod rank;
pub mod request;
pub mod workspace;
