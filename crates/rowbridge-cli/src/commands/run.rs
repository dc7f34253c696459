use std::sync::Arc;

use anyhow::{Context, Result};

use rowbridge_engine::budget::{QueryBudget, QueryMetrics};
use rowbridge_engine::config::MigrationConfig;
use rowbridge_engine::enrich::{HttpRegistryClient, RateLimiter};
use rowbridge_engine::orchestrator::{Pipeline, RunOptions, Step};
use rowbridge_engine::result::RunSummary;
use rowbridge_engine::store::{DryRunTarget, MySqlSource, PgTarget, TargetStore};

/// Execute the `run` command: drive the pipeline through the requested step.
pub async fn execute(
    step: Step,
    dry_run: bool,
    keep_temp: bool,
    tables: Vec<String>,
) -> Result<()> {
    let cfg = MigrationConfig::from_env().context("loading configuration")?;

    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let metrics = Arc::new(QueryMetrics::new(cfg.slow_query_ms));

    let source = MySqlSource::connect(&cfg.source, Arc::clone(&budget), Arc::clone(&metrics))
        .await
        .context("connecting to source")?;
    let target = PgTarget::connect(&cfg.target).await.context("connecting to target")?;

    let limiter = Arc::new(RateLimiter::new(cfg.registry_rps));
    let client = HttpRegistryClient::new(&cfg.registry_base_url, limiter);

    let opts = RunOptions { step, dry_run, keep_temp, tables };
    let summary = if dry_run {
        let target = DryRunTarget::new(target, &cfg.staging_schema, &cfg.target_schema);
        drive(&source, &target, &client, &cfg, &budget, &opts).await?
    } else {
        drive(&source, &target, &client, &cfg, &budget, &opts).await?
    };

    print_summary(&summary);

    let m = metrics.summary();
    tracing::info!(
        total_queries = m.total_queries,
        avg_ms_per_query = m.avg_ms_per_query,
        slow_queries = m.slow_queries.len(),
        "source query metrics"
    );
    Ok(())
}

async fn drive<T: TargetStore>(
    source: &MySqlSource,
    target: &T,
    client: &HttpRegistryClient,
    cfg: &MigrationConfig,
    budget: &QueryBudget,
    opts: &RunOptions,
) -> Result<RunSummary> {
    let pipeline = Pipeline { source, target, registry: Some(client), cfg, budget };
    Ok(pipeline.run(opts).await?)
}

fn print_summary(summary: &RunSummary) {
    let mode = if summary.dry_run { " (dry run)" } else { "" };
    println!("Run {}{}", summary.state, mode);

    for t in &summary.tables {
        println!(
            "  {:14} {:>8} rows staged, {} skipped, {} batches",
            t.table, t.transferred, t.skipped, t.batches
        );
    }
    for m in &summary.merges {
        println!(
            "  {:14} {:>8} rows merged, {} repointed, {} purged, {} ambiguous",
            m.table,
            m.rows_merged,
            m.references_repointed,
            m.soft_deleted_purged,
            m.ambiguous.len()
        );
    }
    for s in &summary.syncs {
        println!(
            "  {:14} {:>8} inserted, {} updated, {} unchanged, {} deleted",
            s.table, s.inserted, s.updated, s.unchanged, s.deleted
        );
    }
    if let Some(e) = &summary.enrichment {
        println!(
            "  identifiers: {} confirmed, {} corrected, {} invalid, {} missing, {} lookup errors",
            e.confirmed, e.corrected, e.invalid_no_correction, e.not_in_registry, e.lookup_errors
        );
    }
    println!("Queries used: {}/{}", summary.queries_used, summary.query_budget);
}
