//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (reqflow-infra) implements. The core crate never depends on any specific
//! storage technology.
//!
//! Ordered families are created and deleted through their entity repository,
//! which links or unlinks the row in the same transaction. Reordering
//! existing rows goes through [`list::ListRepository`].

pub mod execution;
pub mod flow;
pub mod list;
pub mod overlay;
pub mod request;
pub mod workspace;
