//! Shared model types for the rowbridge migration pipeline.

pub mod error;
pub mod normalize;
pub mod registry;
pub mod siret;
pub mod value;
