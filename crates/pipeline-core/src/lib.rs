//! pipeline-core — domain model, persistence, and queue primitives shared by
//! every stage processor and by the orchestrator.

pub mod config;
pub mod migrations;
pub mod models;
pub mod queue;
pub mod rate_limit;
pub mod repository;
pub mod schema;
