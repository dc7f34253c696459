//! SIRENE registry client.
//!
//! Lookups never fail the run: transport errors and throttling are retried
//! with backoff, and exhausted retries collapse into
//! [`LookupOutcome::Error`] for the registry-errors report.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use rowbridge_types::error::MigrationError;
use rowbridge_types::registry::{EstablishmentStatus, LookupOutcome, RegistryRecord};

use crate::error::compute_backoff;

use super::limiter::RateLimiter;

const LOOKUP_ATTEMPTS: u32 = 3;

/// Registry lookup interface; the integration tests substitute a scripted
/// fake.
pub trait RegistryClient {
    async fn lookup(&self, siret: &str) -> LookupOutcome;
}

/// Production client for `recherche-entreprises.api.gouv.fr`.
pub struct HttpRegistryClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl HttpRegistryClient {
    #[must_use]
    pub fn new(base_url: &str, limiter: Arc<RateLimiter>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
        }
    }

    async fn attempt(&self, siret: &str) -> Result<LookupOutcome, MigrationError> {
        self.limiter.acquire().await;

        let url = format!("{}/search", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("q", siret)])
            .send()
            .await
            .map_err(|e| MigrationError::transient_network("REGISTRY_SEND", e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(LookupOutcome::NotFound);
        }
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return Err(MigrationError::rate_limit(
                "REGISTRY_THROTTLED",
                "429 from registry",
                retry_after,
            ));
        }
        if status.is_server_error() {
            return Err(MigrationError::transient_network(
                "REGISTRY_5XX",
                format!("registry returned {status}"),
            ));
        }
        if !status.is_success() {
            return Ok(LookupOutcome::Error(format!("registry returned {status}")));
        }

        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|e| MigrationError::transient_network("REGISTRY_BODY", e.to_string()))?;
        Ok(extract_record(siret, &payload))
    }
}

impl RegistryClient for HttpRegistryClient {
    async fn lookup(&self, siret: &str) -> LookupOutcome {
        let mut last_error = String::new();
        for attempt in 1..=LOOKUP_ATTEMPTS {
            match self.attempt(siret).await {
                Ok(outcome) => return outcome,
                Err(err) if err.retryable && attempt < LOOKUP_ATTEMPTS => {
                    let delay = compute_backoff(&err, attempt);
                    debug!(siret, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying registry lookup");
                    tokio::time::sleep(delay).await;
                    last_error = err.to_string();
                }
                Err(err) => return LookupOutcome::Error(err.to_string()),
            }
        }
        LookupOutcome::Error(last_error)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    nom_complet: Option<String>,
    nom_raison_sociale: Option<String>,
    #[serde(default)]
    matching_etablissements: Vec<Etablissement>,
}

#[derive(Debug, Deserialize)]
struct Etablissement {
    siret: String,
    etat_administratif: Option<String>,
    /// INSEE locality code.
    commune: Option<String>,
    libelle_commune: Option<String>,
    activite_principale: Option<String>,
}

/// Picks the establishment matching the requested identifier out of the
/// search payload.
fn extract_record(siret: &str, payload: &SearchResponse) -> LookupOutcome {
    for result in &payload.results {
        for etab in &result.matching_etablissements {
            if etab.siret != siret {
                continue;
            }
            let status = match etab.etat_administratif.as_deref() {
                Some("F") => EstablishmentStatus::Closed,
                _ => EstablishmentStatus::Active,
            };
            return LookupOutcome::Found(RegistryRecord {
                siret: etab.siret.clone(),
                legal_name: result
                    .nom_raison_sociale
                    .clone()
                    .or_else(|| result.nom_complet.clone()),
                city_code: etab.commune.clone(),
                city_name: etab.libelle_commune.clone(),
                naf_code: etab.activite_principale.clone(),
                status,
            });
        }
    }
    LookupOutcome::NotFound
}
