//! Tracing setup for reqflow binaries.

pub mod tracing_setup;
