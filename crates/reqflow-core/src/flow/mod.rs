//! Flow engine: graph validation, node kinds, the runner and the service
//! that wires them to storage.
//!
//! - `graph` -- validation (single start, known endpoints, acyclic) and regions
//! - `node` -- the `FlowNode` trait, outcomes and the per-run node context
//! - `nodes` -- NOOP, REQUEST, FOR, FOR_EACH and IF
//! - `status` -- status event delivery with a drop policy for non-terminal events
//! - `runner` -- `Single`/`Multi` scheduling, cancellation and timeouts
//! - `service` -- loads a stored flow, resolves requests, journals every event

pub mod graph;
pub mod node;
pub mod nodes;
pub mod runner;
pub mod service;
pub mod status;
