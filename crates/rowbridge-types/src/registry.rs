//! Registry lookup model and enrichment outcomes.
//!
//! The registry is an untrusted, rate-limited HTTP dependency; its
//! unavailability is a normal outcome ([`LookupOutcome::Error`]), never a
//! reason to abort a run.

use serde::{Deserialize, Serialize};

use crate::normalize::{company_name_key, significant_common_words};

/// Administrative status of an establishment as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstablishmentStatus {
    Active,
    Closed,
}

/// One establishment record as returned by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub siret: String,
    pub legal_name: Option<String>,
    /// INSEE locality code (e.g. "63338"), not a postal code.
    pub city_code: Option<String>,
    pub city_name: Option<String>,
    pub naf_code: Option<String>,
    pub status: EstablishmentStatus,
}

/// Outcome of one registry lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found(RegistryRecord),
    NotFound,
    /// Transport failure or persistent non-2xx after retries. The message is
    /// for the registry-errors report.
    Error(String),
}

/// The identifier plus the expected attributes read from the source record,
/// used to score correction candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierRecord {
    pub siret: String,
    pub expected_name: Option<String>,
    pub expected_city_code: Option<String>,
    pub expected_city_name: Option<String>,
}

/// A checksum-valid identifier at Hamming distance 1 from an invalid input,
/// confirmed by the registry and scored against the source record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionCandidate {
    pub siret: String,
    pub legal_name: Option<String>,
    pub city_code: Option<String>,
    pub city_name: Option<String>,
    pub hamming_distance: usize,
    pub name_score: usize,
    pub city_score: usize,
}

impl CorrectionCandidate {
    /// Builds a scored candidate from a registry record and the expected
    /// source attributes.
    ///
    /// Name score counts significant common words between normalized names;
    /// city score is 2 for an exact INSEE code match, 0 otherwise.
    #[must_use]
    pub fn score(record: &RegistryRecord, expected: &IdentifierRecord, distance: usize) -> Self {
        let name_score = match (&expected.expected_name, &record.legal_name) {
            (Some(want), Some(got)) => {
                significant_common_words(&company_name_key(want), &company_name_key(got))
            }
            _ => 0,
        };

        let city_score = match (&expected.expected_city_code, &record.city_code) {
            (Some(want), Some(got)) if want == got => 2,
            _ => 0,
        };

        Self {
            siret: record.siret.clone(),
            legal_name: record.legal_name.clone(),
            city_code: record.city_code.clone(),
            city_name: record.city_name.clone(),
            hamming_distance: distance,
            name_score,
            city_score,
        }
    }

    /// Weighted combined score used for ranking.
    #[must_use]
    pub fn combined(&self, name_weight: f64, city_weight: f64) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        {
            name_weight * self.name_score as f64 + city_weight * self.city_score as f64
        }
    }
}

/// Final outcome of validating one identifier, driving report routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnrichmentResult {
    /// Checksum passed and the registry confirmed an active establishment.
    Confirmed { record: RegistryRecord },
    /// Checksum passed but the registry has no active record. Distinct from
    /// a checksum failure: the digits are plausible, the registry lacks the
    /// entry.
    NotInRegistry,
    /// Checksum failed; ranked distance-1 candidates survived validation.
    Corrected { candidates: Vec<CorrectionCandidate> },
    /// Checksum failed and no candidate survived filtering.
    InvalidNoCorrection,
    /// The registry could not be reached; reported, never fatal.
    LookupError { message: String },
}
