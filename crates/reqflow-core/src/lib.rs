//! Business logic and repository trait definitions for reqflow.
//!
//! This crate defines the "ports" (repository traits and the HTTP client
//! trait) that the infrastructure layer implements, plus everything that runs
//! on top of them: the linked-list planner, delta resolution, the overlay
//! and assertion-delta services, the node journal and the flow engine. It
//! depends only on `reqflow-types` -- never on `reqflow-infra` or any
//! database/IO crate.

pub mod codec;
pub mod delta;
pub mod example;
pub mod exchange;
pub mod expression;
pub mod flow;
pub mod http;
pub mod journal;
pub mod ordering;
pub mod overlay;
pub mod repository;
pub mod service;
pub mod vars;
