use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use medallion_etl::config::PipelineConfig;
use medallion_etl::observability::{logging, metrics};
use medallion_etl::pipeline::aggregate;
use medallion_etl::pipeline::PipelineCoordinator;
use medallion_etl::storage::{InMemoryTierStore, Tier, TierStore};
use medallion_etl::RunState;

#[derive(Parser)]
#[command(name = "medallion-etl")]
#[command(about = "Batch transformation pipeline: raw → cleaned → aggregated order tables")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline over the four source extracts
    Run {
        /// Path to a TOML pipeline configuration
        #[arg(long, conflicts_with = "extract_dir")]
        config: Option<PathBuf>,
        /// Directory holding customers/products/order_lines/order_headers CSVs
        #[arg(long)]
        extract_dir: Option<PathBuf>,
        /// Tolerate empty raw tables (zero new rows is a legal run)
        #[arg(long)]
        incremental: bool,
    },
    /// Print the default aggregation specs as JSON
    Specs {
        /// Row limit for the top-customers spec
        #[arg(long, default_value_t = 10)]
        top_customers_limit: usize,
    },
    /// Print the metric catalog
    MetricsCatalog,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load environment variables
    dotenv::dotenv().ok();

    logging::init_logging();

    match cli.command {
        Commands::Run {
            config,
            extract_dir,
            incremental,
        } => {
            let mut config = match (config, extract_dir) {
                (Some(path), _) => PipelineConfig::from_file(&path)?,
                (None, Some(dir)) => PipelineConfig::with_extract_dir(&dir),
                (None, None) => {
                    anyhow::bail!("either --config or --extract-dir is required")
                }
            };
            if incremental {
                config.incremental = true;
            }

            info!("Initializing tier store...");
            let store = Arc::new(InMemoryTierStore::new());
            let coordinator =
                PipelineCoordinator::new(Arc::clone(&store) as Arc<dyn TierStore>, config);

            let report = coordinator.run().await;
            for tier in [Tier::Raw, Tier::Cleaned, Tier::Aggregated] {
                let tables = store.table_names(tier).await?;
                info!("{} tier holds [{}]", tier, tables.join(", "));
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.state != RunState::Done {
                anyhow::bail!("pipeline run ended in {:?}", report.state);
            }
        }
        Commands::Specs { top_customers_limit } => {
            let specs = aggregate::default_specs(top_customers_limit);
            println!("{}", serde_json::to_string_pretty(&specs)?);
        }
        Commands::MetricsCatalog => {
            for (name, description) in metrics::CATALOG.iter() {
                println!("{name}  {description}");
            }
        }
    }

    Ok(())
}
