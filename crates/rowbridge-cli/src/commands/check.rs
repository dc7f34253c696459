use std::sync::Arc;

use anyhow::Result;

use rowbridge_engine::budget::{QueryBudget, QueryMetrics};
use rowbridge_engine::catalog;
use rowbridge_engine::config::MigrationConfig;
use rowbridge_engine::store::{MySqlSource, PgTarget, SourceStore, TargetStore};

/// Execute the `check` command: validate configuration and connectivity
/// without migrating anything.
pub async fn execute() -> Result<()> {
    let cfg = match MigrationConfig::from_env() {
        Ok(cfg) => {
            println!("Configuration:     OK");
            cfg
        }
        Err(e) => {
            println!("Configuration:     FAILED");
            println!("  {e}");
            anyhow::bail!("One or more checks failed")
        }
    };

    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let metrics = Arc::new(QueryMetrics::new(cfg.slow_query_ms));
    let mut ok = true;

    match MySqlSource::connect(&cfg.source, budget, metrics).await {
        Ok(source) => match source.list_tables().await {
            Ok(tables) => {
                println!("Source:            OK");
                for spec in catalog::CATALOG {
                    if !tables.iter().any(|t| t == spec.name) {
                        println!("  missing source table: {}", spec.name);
                        ok = false;
                    }
                }
            }
            Err(e) => {
                println!("Source:            FAILED");
                println!("  {e}");
                ok = false;
            }
        },
        Err(e) => {
            println!("Source:            FAILED");
            println!("  {e}");
            ok = false;
        }
    }

    match PgTarget::connect(&cfg.target).await {
        Ok(target) => match target.schema_exists(&cfg.target_schema).await {
            Ok(true) => println!("Target:            OK"),
            Ok(false) => {
                println!("Target:            FAILED");
                println!("  schema {:?} does not exist", cfg.target_schema);
                ok = false;
            }
            Err(e) => {
                println!("Target:            FAILED");
                println!("  {e}");
                ok = false;
            }
        },
        Err(e) => {
            println!("Target:            FAILED");
            println!("  {e}");
            ok = false;
        }
    }

    if ok {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}
