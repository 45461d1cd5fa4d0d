//! # Knowledge Weaver Core
//!
//! Shared, runtime-agnostic logic for Knowledge Weaver: data models, the
//! error taxonomy, index and event-log abstractions, ranking, gap
//! aggregation, and few-shot example selection.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Storage backends, providers, and the services that orchestrate them live
//! in the `knowledge-weaver` crate.

pub mod embedding;
pub mod error;
pub mod few_shot;
pub mod gaps;
pub mod models;
pub mod search;
pub mod store;

pub use error::{Result, WeaverError};
