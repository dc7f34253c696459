mod commands;
mod logging;

use clap::{Parser, Subcommand, ValueEnum};

use rowbridge_engine::orchestrator::Step;

#[derive(Parser)]
#[command(
    name = "rowbridge",
    version,
    about = "MariaDB to PostgreSQL migration and SIRET enrichment pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum StepArg {
    /// Migrate, clean, and sync
    Full,
    /// Stage source data only; keeps the staging schema
    Migrate,
    /// Clean an existing staging schema
    Cleanup,
    /// Sync an existing staging schema into the target
    Sync,
}

impl From<StepArg> for Step {
    fn from(arg: StepArg) -> Self {
        match arg {
            StepArg::Full => Self::Full,
            StepArg::Migrate => Self::Migrate,
            StepArg::Cleanup => Self::Cleanup,
            StepArg::Sync => Self::Sync,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration pipeline
    Run {
        /// Pipeline step to execute
        #[arg(long, value_enum, default_value_t = StepArg::Full)]
        step: StepArg,
        /// Walk every phase without writing to the target
        #[arg(long)]
        dry_run: bool,
        /// Keep the staging schema after a successful run
        #[arg(long)]
        keep_temp: bool,
        /// Comma-separated subset of tables to process
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },
    /// Validate configuration and database connectivity
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { step, dry_run, keep_temp, tables } => {
            commands::run::execute(step.into(), dry_run, keep_temp, tables).await
        }
        Commands::Check => commands::check::execute().await,
    }
}
