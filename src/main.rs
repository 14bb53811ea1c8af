use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use barri_etl::app::{record_setup_failure, ReconcileUseCase};
use barri_etl::config::{Config, DEFAULT_CONFIG_PATH};
use barri_etl::constants::{DEFAULT_REFERENCE_PATH, METRICS_SNAPSHOT_SUFFIX};
use barri_etl::infra::FsManifest;
use barri_etl::logging::init_logging;
use barri_etl::pipeline::ingestion::SourceRegistry;
use barri_etl::pipeline::processing::territory::AliasTable;
use barri_etl::pipeline::storage::seed::seed_from_reference;
use barri_etl::pipeline::storage::{SqliteStorage, Storage};
use barri_etl::{metrics, report};

#[derive(Parser)]
#[command(name = "barri_etl")]
#[command(about = "Reconcile neighborhood open-data extracts into a consolidated store")]
#[command(version = "0.1.0")]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, global = true, env = "BARRI_ETL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level: error, warn, info, debug or trace (RUST_LOG overrides)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation pipeline over the latest raw extracts
    Run {
        /// Raw-data root holding manifest.jsonl and the extracts
        #[arg(long)]
        data_root: PathBuf,
        /// SQLite store to populate
        #[arg(long)]
        store: PathBuf,
    },
    /// Seed the neighborhood dimension from the administrative reference
    Seed {
        #[arg(long)]
        store: PathBuf,
        #[arg(long, default_value = DEFAULT_REFERENCE_PATH)]
        reference: PathBuf,
    },
    /// List audit records, newest first
    Runs {
        #[arg(long)]
        store: PathBuf,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Ok(Config::load(Path::new(DEFAULT_CONFIG_PATH))?)
        }
        None => Ok(Config::default()),
    }
}

/// Load everything a run needs besides the store
fn load_run_inputs(
    config: &Config,
    data_root: &Path,
) -> anyhow::Result<(SourceRegistry, AliasTable, FsManifest)> {
    let registry = SourceRegistry::load_from_directory(&config.sources.registry_dir)
        .context("Failed to load source registry")?;
    let aliases = match &config.territory.aliases_path {
        Some(path) => AliasTable::load(path).context("Failed to load alias table")?,
        None => {
            warn!("No alias table configured");
            AliasTable::empty()
        }
    };
    let manifest = FsManifest::open(data_root).context("Failed to read manifest")?;
    Ok((registry, aliases, manifest))
}

fn snapshot_path(store: &Path) -> PathBuf {
    PathBuf::from(format!("{}.{}", store.display(), METRICS_SNAPSHOT_SUFFIX))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let _guard = init_logging(&cli.log_level, &config.logging.dir);

    match cli.command {
        Commands::Run { data_root, store } => {
            metrics::init_metrics();
            println!("🔄 Reconciling extracts from {}...", data_root.display());

            let storage: Arc<dyn Storage> = Arc::new(
                SqliteStorage::open(&store)
                    .with_context(|| format!("Failed to open store {}", store.display()))?,
            );
            let invocation = json!({
                "data_root": data_root.display().to_string(),
                "store": store.display().to_string(),
                "config": cli.config.as_ref().map(|p| p.display().to_string()),
                "log_level": cli.log_level,
            });
            let run = match load_run_inputs(&config, &data_root) {
                Ok((registry, aliases, manifest)) => {
                    let use_case = ReconcileUseCase::new(
                        config,
                        registry,
                        aliases,
                        Box::new(manifest),
                        storage,
                    );
                    use_case.run(invocation).await?
                }
                Err(e) => record_setup_failure(storage, invocation, &format!("{:#}", e)).await?,
            };
            println!("{}", report::render(&run));

            let snapshot = snapshot_path(&store);
            if let Err(e) = metrics::write_snapshot(&snapshot) {
                warn!(path = %snapshot.display(), error = %e, "Failed to write metrics snapshot");
            }
            Ok(ExitCode::from(run.status.exit_code()))
        }
        Commands::Seed { store, reference } => {
            println!("🌱 Seeding neighborhoods from {}...", reference.display());
            let storage = SqliteStorage::open(&store)?;
            let seeded = seed_from_reference(&storage, &reference).await?;
            println!(
                "✅ {} read, {} inserted, {} geometries back-filled",
                seeded.read, seeded.inserted, seeded.geometries_backfilled
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Runs { store, limit } => {
            let storage = SqliteStorage::open(&store)?;
            let runs = storage.list_runs(limit).await?;
            if runs.is_empty() {
                println!("No runs recorded in {}", store.display());
            }
            for record in &runs {
                println!("{}", report::render_run_line(record));
            }
            info!(count = runs.len(), "Listed runs");
            Ok(ExitCode::SUCCESS)
        }
    }
}
