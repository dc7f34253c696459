//! SIRET enrichment phase: validation, correction, and registry lookups.

use tracing::info;

use rowbridge_types::error::MigrationError;
use rowbridge_types::registry::{EnrichmentResult, IdentifierRecord};

use crate::catalog::TableSpec;
use crate::config::MigrationConfig;
use crate::result::EnrichmentStats;
use crate::store::SourceStore;

pub mod client;
pub mod corrector;
pub mod limiter;

pub use client::{HttpRegistryClient, RegistryClient};
pub use limiter::RateLimiter;

/// Validates every identifier carried by the selected tables.
///
/// Identifiers are read from the source database, so a dry run sees exactly
/// the data a live run would and the report files come out byte for byte
/// identical.
///
/// # Errors
///
/// Propagates source store failures. Registry trouble is folded into
/// per-identifier outcomes, never an error.
pub async fn run_enrichment<S: SourceStore, C: RegistryClient>(
    source: &S,
    client: &C,
    cfg: &MigrationConfig,
    tables: &[&'static TableSpec],
) -> Result<(Vec<(IdentifierRecord, EnrichmentResult)>, EnrichmentStats), MigrationError> {
    let mut outcomes = Vec::new();
    let mut stats = EnrichmentStats::default();

    for table in tables {
        if table.identifier_column.is_none() {
            continue;
        }
        let records = source.identifier_records(table).await?;
        info!(table = table.name, identifiers = records.len(), "validating identifiers");

        for record in records {
            let result = corrector::validate(
                client,
                &record,
                cfg.candidate_workers,
                cfg.name_match_weight,
                cfg.city_match_weight,
            )
            .await;
            match &result {
                EnrichmentResult::Confirmed { .. } => stats.confirmed += 1,
                EnrichmentResult::NotInRegistry => stats.not_in_registry += 1,
                EnrichmentResult::Corrected { .. } => stats.corrected += 1,
                EnrichmentResult::InvalidNoCorrection => stats.invalid_no_correction += 1,
                EnrichmentResult::LookupError { .. } => stats.lookup_errors += 1,
            }
            outcomes.push((record, result));
        }
    }

    info!(
        confirmed = stats.confirmed,
        not_in_registry = stats.not_in_registry,
        corrected = stats.corrected,
        invalid = stats.invalid_no_correction,
        lookup_errors = stats.lookup_errors,
        "enrichment finished"
    );
    Ok((outcomes, stats))
}
