//! # Knowledge Weaver
//!
//! Turns support chat transcripts and manual captures into a searchable,
//! human-verified knowledge base.
//!
//! Chat logs are segmented, scrubbed of personal identifiers, classified by a
//! language model, embedded, and stored as draft entries. Humans review and
//! correct them; every correction is logged and replayed as few-shot context
//! for later classifications. Queries that find nothing useful are recorded
//! and surface as knowledge gaps.
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | The assembled [`engine::Weaver`] and all its operations |
//! | [`repository`] | Entry lifecycle: create, edit, soft delete, restore |
//! | [`processor`] | Chat log segmentation and batch ingestion |
//! | [`query`] | Semantic retrieval with query logging |
//! | [`learning`] | Correction log and few-shot context |
//! | [`gaps`] / [`metrics`] | Gap backlog and dashboard counters |
//! | [`provider`] / [`retry`] | Model backends and the shared retry policy |
//! | [`sqlite_store`] / [`migrate`] / [`db`] | SQLite persistence |
//! | [`server`] | JSON HTTP API |

pub mod anonymize;
pub mod config;
pub mod db;
pub mod engine;
pub mod gaps;
pub mod learning;
pub mod locks;
pub mod metrics;
pub mod migrate;
pub mod processor;
pub mod provider;
pub mod query;
pub mod repository;
pub mod retry;
pub mod server;
pub mod sqlite_store;
