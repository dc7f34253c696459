//! Identifier validation and correction.
//!
//! A checksum-valid identifier is confirmed against the registry; a
//! checksum-invalid one gets its distance-1 valid siblings generated and
//! validated through a bounded worker pool, then ranked. Ranking is
//! deterministic: combined score descending, Hamming distance ascending,
//! candidate value ascending.

use futures::stream::{self, StreamExt};

use rowbridge_types::registry::{
    CorrectionCandidate, EnrichmentResult, EstablishmentStatus, IdentifierRecord, LookupOutcome,
};
use rowbridge_types::siret::{is_valid_siret, luhn_valid_candidates};

use super::client::RegistryClient;

/// Ranked candidates kept per corrected identifier.
const MAX_RANKED: usize = 5;

/// Validates one identifier end to end. `workers` bounds the concurrent
/// candidate lookups.
pub async fn validate<C: RegistryClient>(
    client: &C,
    record: &IdentifierRecord,
    workers: usize,
    name_weight: f64,
    city_weight: f64,
) -> EnrichmentResult {
    if is_valid_siret(&record.siret) {
        return match client.lookup(&record.siret).await {
            LookupOutcome::Found(reg) if reg.status == EstablishmentStatus::Active => {
                EnrichmentResult::Confirmed { record: reg }
            }
            // A closed establishment is no longer in the active registry.
            LookupOutcome::Found(_) | LookupOutcome::NotFound => EnrichmentResult::NotInRegistry,
            LookupOutcome::Error(message) => EnrichmentResult::LookupError { message },
        };
    }

    let candidates = luhn_valid_candidates(&record.siret);
    if candidates.is_empty() {
        return EnrichmentResult::InvalidNoCorrection;
    }

    let outcomes: Vec<(String, LookupOutcome)> = stream::iter(candidates.into_iter().map(
        |candidate| async move {
            let outcome = client.lookup(&candidate).await;
            (candidate, outcome)
        },
    ))
    .buffer_unordered(workers.max(1))
    .collect()
    .await;

    let mut scored = Vec::new();
    let mut first_error = None;
    for (_, outcome) in outcomes {
        match outcome {
            LookupOutcome::Found(reg) if reg.status == EstablishmentStatus::Active => {
                scored.push(CorrectionCandidate::score(&reg, record, 1));
            }
            LookupOutcome::Found(_) | LookupOutcome::NotFound => {}
            LookupOutcome::Error(message) => {
                if first_error.is_none() {
                    first_error = Some(message);
                }
            }
        }
    }

    if scored.is_empty() {
        // Distinguish "the registry knows none of these" from "the registry
        // could not be asked"; the latter must never read as invalid data.
        return match first_error {
            Some(message) => EnrichmentResult::LookupError { message },
            None => EnrichmentResult::InvalidNoCorrection,
        };
    }

    scored.sort_by(|a, b| {
        b.combined(name_weight, city_weight)
            .partial_cmp(&a.combined(name_weight, city_weight))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.hamming_distance.cmp(&b.hamming_distance))
            .then_with(|| a.siret.cmp(&b.siret))
    });
    scored.truncate(MAX_RANKED);
    EnrichmentResult::Corrected { candidates: scored }
}
