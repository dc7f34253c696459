//! Migration engine: staged transfer, cleanup/dedup, sync, and SIRET
//! enrichment against the SIRENE registry.

pub mod budget;
pub mod catalog;
pub mod cleanup;
pub mod config;
pub mod enrich;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod result;
pub mod schema;
pub mod store;
pub mod sync;
pub mod transfer;
