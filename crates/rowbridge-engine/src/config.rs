//! Environment-sourced run configuration.
//!
//! Read once at process start; nothing is re-read mid-run. Validation
//! reports every missing variable in a single error so operators fix the
//! environment in one pass.

use std::collections::HashMap;

use rowbridge_types::error::MigrationError;

/// Hard ceiling on the adaptive batch size.
pub const MAX_BATCH_SIZE: u64 = 10_000;

const DEFAULT_BATCH_SIZE: u64 = 500;
const DEFAULT_QUERY_BUDGET: u64 = 5_000;
const DEFAULT_SLOW_QUERY_MS: u64 = 200;
const DEFAULT_REGISTRY_RPS: u32 = 7;
const DEFAULT_CANDIDATE_WORKERS: usize = 4;
const DEFAULT_REGISTRY_BASE_URL: &str = "https://recherche-entreprises.api.gouv.fr";
const DEFAULT_NAME_MATCH_WEIGHT: f64 = 1.0;
const DEFAULT_CITY_MATCH_WEIGHT: f64 = 2.0;

/// Connection parameters for one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// Full run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    pub source: DbConfig,
    pub target: DbConfig,
    /// Permanent warehouse schema.
    pub target_schema: String,
    /// Ephemeral staging schema owned by one run at a time.
    pub staging_schema: String,

    pub batch_size: u64,
    pub query_budget: u64,
    pub slow_query_ms: u64,

    pub enrichment_enabled: bool,
    pub registry_rps: u32,
    pub registry_base_url: String,
    /// Concurrent registry lookups while validating correction candidates.
    pub candidate_workers: usize,
    /// Candidate-scoring weights; tunable, not a contract.
    pub name_match_weight: f64,
    pub city_match_weight: f64,

    pub report_dir: String,
}

impl MigrationConfig {
    /// Loads configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error listing every missing required variable.
    pub fn from_env() -> Result<Self, MigrationError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Loads configuration from an explicit variable map (injectable for
    /// tests).
    ///
    /// # Errors
    ///
    /// Returns a `Config` error listing every missing required variable, or
    /// naming the first unparseable numeric value.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, MigrationError> {
        const REQUIRED: &[&str] = &[
            "SOURCE_HOST",
            "SOURCE_USER",
            "SOURCE_PASSWORD",
            "SOURCE_DB",
            "TARGET_HOST",
            "TARGET_USER",
            "TARGET_PASSWORD",
            "TARGET_DB",
        ];

        let missing: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .filter(|name| vars.get(*name).is_none_or(|v| v.is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(MigrationError::config(
                "MISSING_VARS",
                format!("missing environment variable(s): {}", missing.join(", ")),
            ));
        }

        let get = |name: &str| vars.get(name).cloned().unwrap_or_default();
        let get_or = |name: &str, default: &str| {
            vars.get(name)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            source: DbConfig {
                host: get("SOURCE_HOST"),
                port: parse_num(vars, "SOURCE_PORT", 3306)?,
                user: get("SOURCE_USER"),
                password: get("SOURCE_PASSWORD"),
                database: get("SOURCE_DB"),
            },
            target: DbConfig {
                host: get("TARGET_HOST"),
                port: parse_num(vars, "TARGET_PORT", 5432)?,
                user: get("TARGET_USER"),
                password: get("TARGET_PASSWORD"),
                database: get("TARGET_DB"),
            },
            target_schema: get_or("TARGET_SCHEMA", "staging"),
            staging_schema: get_or("STAGING_SCHEMA", "temp_staging"),
            batch_size: parse_num(vars, "BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            query_budget: parse_num(vars, "QUERY_BUDGET", DEFAULT_QUERY_BUDGET)?,
            slow_query_ms: parse_num(vars, "SLOW_QUERY_MS", DEFAULT_SLOW_QUERY_MS)?,
            enrichment_enabled: get_or("ENABLE_ENRICHMENT", "false").eq_ignore_ascii_case("true"),
            registry_rps: parse_num(vars, "REGISTRY_RPS", DEFAULT_REGISTRY_RPS)?,
            registry_base_url: get_or("REGISTRY_BASE_URL", DEFAULT_REGISTRY_BASE_URL),
            candidate_workers: parse_num(vars, "CANDIDATE_WORKERS", DEFAULT_CANDIDATE_WORKERS)?
                .max(1),
            name_match_weight: parse_num(vars, "NAME_MATCH_WEIGHT", DEFAULT_NAME_MATCH_WEIGHT)?,
            city_match_weight: parse_num(vars, "CITY_MATCH_WEIGHT", DEFAULT_CITY_MATCH_WEIGHT)?,
            report_dir: get_or("REPORT_DIR", "reports"),
        })
    }

    /// Effective batch size, clamped to the hard ceiling.
    #[must_use]
    pub fn effective_batch_size(&self) -> u64 {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}

fn parse_num<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, MigrationError> {
    match vars.get(name).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| {
            MigrationError::config("BAD_VALUE", format!("{name}={raw:?} is not a valid number"))
        }),
    }
}
