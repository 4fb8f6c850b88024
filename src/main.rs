//! knotfit CLI: resolve observations against an invariant catalog.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use knotfit::catalog::{InvariantCatalog, Partition};
use knotfit::config::RunConfig;
use knotfit::run::AnalysisRun;
use knotfit::target::{LogLinearFormula, Observation};

#[derive(Parser)]
#[command(name = "knotfit", version, about = "Constrained knot/link candidate resolver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve every observation under the configured hypothesis.
    Run {
        /// JSON array of invariant records.
        #[arg(long)]
        catalog: PathBuf,

        /// JSON array of observations.
        #[arg(long)]
        observations: PathBuf,

        /// TOML run configuration. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Also run the permutation, bootstrap and LOO checks.
        #[arg(long)]
        significance: bool,

        /// Also re-run selection once per held-out observation.
        #[arg(long)]
        audit: bool,
    },

    /// Print one catalog record as JSON.
    Lookup {
        /// JSON array of invariant records.
        #[arg(long)]
        catalog: PathBuf,

        /// Record name, e.g. "3_1" or "L2a1{0}".
        name: String,
    },

    /// Show catalog size per partition.
    Info {
        /// JSON array of invariant records.
        #[arg(long)]
        catalog: PathBuf,
    },
}

fn load_catalog(path: &Path) -> Result<InvariantCatalog> {
    let content = std::fs::read_to_string(path).into_diagnostic()?;
    Ok(InvariantCatalog::from_json_str(&content)?)
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            catalog,
            observations,
            config,
            significance,
            audit,
        } => {
            let catalog = load_catalog(&catalog)?;
            let config = match config {
                Some(path) => RunConfig::load(&path)?,
                None => RunConfig::default(),
            };
            let content = std::fs::read_to_string(&observations).into_diagnostic()?;
            let observations: Vec<Observation> =
                serde_json::from_str(&content).into_diagnostic()?;

            let run = AnalysisRun::new(Arc::new(catalog), config)?;
            let formula = LogLinearFormula::default();
            let report = run.report(&observations, &formula, significance)?;

            let mut output = serde_json::to_value(&report).into_diagnostic()?;
            if audit {
                let audit = run.reselection_audit(&observations, &formula, &report.assignments)?;
                output["audit"] = serde_json::to_value(&audit).into_diagnostic()?;
            }
            println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
        }

        Commands::Lookup { catalog, name } => {
            let catalog = load_catalog(&catalog)?;
            let record = catalog.lookup_exact(&name)?;
            println!("{}", serde_json::to_string_pretty(record).into_diagnostic()?);
        }

        Commands::Info { catalog } => {
            let catalog = load_catalog(&catalog)?;
            println!("Records: {}", catalog.len());
            println!("  knots: {}", catalog.partition_len(Partition::Knots));
            println!("  links: {}", catalog.partition_len(Partition::Links));
        }
    }

    Ok(())
}
