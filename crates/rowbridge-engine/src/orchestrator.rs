//! Pipeline orchestrator: drives the run through its phases.
//!
//! State machine: `INIT -> MIGRATING -> CLEANING -> SYNCING -> DONE`, with
//! `FAILED` absorbing from every state. Partial steps enter the machine at
//! the phase they run. On failure the staging schema is always retained so
//! the operator can inspect it, regardless of flags.

use std::time::Instant;

use chrono::Local;
use tracing::{error, info};

use rowbridge_types::error::MigrationError;

use crate::budget::QueryBudget;
use crate::catalog::{self, TableSpec};
use crate::cleanup::run_cleanup;
use crate::config::MigrationConfig;
use crate::enrich::{run_enrichment, RegistryClient};
use crate::error::PipelineError;
use crate::report::write_reports;
use crate::result::{RunState, RunSummary};
use crate::schema::{self, StagingSchema};
use crate::store::{SourceStore, TargetStore};
use crate::sync::run_sync;
use crate::transfer::transfer_table;

/// Which part of the pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Full,
    Migrate,
    Cleanup,
    Sync,
}

/// Per-invocation options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub step: Step,
    pub dry_run: bool,
    pub keep_temp: bool,
    pub tables: Vec<String>,
}

/// A failed run, with the phase it failed in.
#[derive(Debug)]
pub struct RunError {
    pub state: RunState,
    pub error: PipelineError,
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run failed in phase {}: {}", self.state, self.error)
    }
}

impl std::error::Error for RunError {}

/// The migration pipeline over a source, a target, and an optional registry
/// client.
pub struct Pipeline<'a, S, T, C> {
    pub source: &'a S,
    pub target: &'a T,
    pub registry: Option<&'a C>,
    pub cfg: &'a MigrationConfig,
    pub budget: &'a QueryBudget,
}

impl<S, T, C> Pipeline<'_, S, T, C>
where
    S: SourceStore,
    T: TargetStore,
    C: RegistryClient,
{
    /// Runs the requested step(s) to completion.
    ///
    /// # Errors
    ///
    /// Returns a [`RunError`] naming the phase that failed. The staging
    /// schema is retained on failure.
    pub async fn run(&self, opts: &RunOptions) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        let mut state = RunState::Init;

        let result = self.drive(opts, &mut state).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(mut summary) => {
                transition(&mut state, RunState::Done);
                summary.state = state;
                summary.elapsed_ms = elapsed_ms;
                summary.queries_used = self.budget.used();
                match serde_json::to_string(&summary) {
                    Ok(json) => info!(summary = %json, "run complete"),
                    Err(e) => info!(error = %e, "run complete (summary not serializable)"),
                }
                Ok(summary)
            }
            Err(error) => {
                let failed_in = state;
                state = RunState::Failed;
                error!(
                    phase = %failed_in,
                    state = %state,
                    error = %error,
                    "run failed; staging schema retained for inspection"
                );
                Err(RunError { state: failed_in, error })
            }
        }
    }

    async fn drive(
        &self,
        opts: &RunOptions,
        state: &mut RunState,
    ) -> Result<RunSummary, PipelineError> {
        let tables = catalog::resolve(&opts.tables)?;
        let mut summary = RunSummary {
            state: *state,
            dry_run: opts.dry_run,
            tables: Vec::new(),
            merges: Vec::new(),
            syncs: Vec::new(),
            enrichment: None,
            queries_used: 0,
            query_budget: self.budget.ceiling(),
            elapsed_ms: 0,
        };

        let staging = if matches!(opts.step, Step::Full | Step::Migrate) {
            transition(state, RunState::Migrating);
            let staging = schema::prepare(
                self.target,
                &self.cfg.staging_schema,
                &self.cfg.target_schema,
                &tables,
            )
            .await?;
            for table in &tables {
                let stats =
                    transfer_table(self.source, self.target, self.budget, self.cfg, table).await?;
                summary.tables.push(stats);
            }
            staging
        } else {
            self.existing_staging(&tables).await?
        };

        if matches!(opts.step, Step::Full | Step::Cleanup) {
            transition(state, RunState::Cleaning);
            summary.merges = run_cleanup(self.target, self.cfg, &tables).await?;

            if self.cfg.enrichment_enabled {
                if let Some(client) = self.registry {
                    let (outcomes, stats) =
                        run_enrichment(self.source, client, self.cfg, &tables).await?;
                    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
                    let paths = write_reports(
                        self.cfg.report_dir.as_ref(),
                        &timestamp,
                        &outcomes,
                        self.cfg.name_match_weight,
                        self.cfg.city_match_weight,
                    )?;
                    info!(
                        corrections = %paths.corrections.display(),
                        invalid = %paths.invalid.display(),
                        registry_errors = %paths.registry_errors.display(),
                        "reports written"
                    );
                    summary.enrichment = Some(stats);
                }
            }
        }

        if matches!(opts.step, Step::Full | Step::Sync) {
            transition(state, RunState::Syncing);
            summary.syncs = run_sync(self.target, self.cfg, &tables).await?;

            if opts.keep_temp {
                info!(schema = %staging.name, "staging schema kept on request");
            } else {
                schema::discard(self.target, &staging).await?;
            }
        }

        Ok(summary)
    }

    /// For partial steps that start after migration: the staging schema must
    /// already exist.
    async fn existing_staging(
        &self,
        tables: &[&'static TableSpec],
    ) -> Result<StagingSchema, MigrationError> {
        if !self.target.schema_exists(&self.cfg.staging_schema).await? {
            return Err(MigrationError::config(
                "NO_STAGING",
                format!(
                    "staging schema {:?} does not exist; run the migrate step first",
                    self.cfg.staging_schema
                ),
            ));
        }
        Ok(StagingSchema {
            name: self.cfg.staging_schema.clone(),
            tables: tables.iter().map(|t| t.name.to_string()).collect(),
        })
    }
}

/// Legal forward transitions.
const TRANSITIONS: &[(RunState, RunState)] = &[
    (RunState::Init, RunState::Migrating),
    (RunState::Init, RunState::Cleaning),
    (RunState::Init, RunState::Syncing),
    (RunState::Migrating, RunState::Cleaning),
    (RunState::Migrating, RunState::Done),
    (RunState::Cleaning, RunState::Syncing),
    (RunState::Cleaning, RunState::Done),
    (RunState::Syncing, RunState::Done),
];

fn transition(state: &mut RunState, to: RunState) {
    debug_assert!(
        TRANSITIONS.contains(&(*state, to)),
        "illegal transition {state} -> {to}"
    );
    info!(from = %state, to = %to, "phase transition");
    *state = to;
}
