use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use lotwise_cache::CacheManager;
use lotwise_core::{
    enrichment::SNAPSHOT_NAMESPACE, Config, CycleReport, EnrichmentCache,
    IncrementalUpdateCoordinator, ItemStore, Lot, MarketplaceOracle, MemoryItemStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lotwise")]
#[command(version, about = "Bundle scanned books into priced lots and keep them current", long_about = None)]
struct Cli {
    /// JSON file with the item catalog (an array of items)
    #[arg(long, global = true, env = "LOTWISE_ITEMS")]
    items: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Keep market snapshots in memory only
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every lot from scratch and print them
    Rebuild,
    /// Apply one item change and re-price only the lots it touches
    Update {
        /// Item id (ISBN)
        item_id: String,
        /// Drop the item from the catalog
        #[arg(long, conflicts_with_all = ["price", "condition"])]
        remove: bool,
        /// New per-item price estimate
        #[arg(long)]
        price: Option<f64>,
        /// New condition
        #[arg(long)]
        condition: Option<String>,
    },
    /// Manage the market snapshot cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete every cached snapshot
    Clear,
    /// Delete snapshots older than the given age
    Prune {
        #[arg(long, default_value_t = 72)]
        older_than_hours: i64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - helps when things go sideways
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lotwise=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load config")?;

    match cli.command {
        Some(Commands::Rebuild) => {
            let (_, coordinator) = build_engine(&cli, &config)?;
            let report = coordinator.trigger_full_rebuild().await?;
            tracing::info!("Built {} lots in {:?}", report.rescored, report.duration);
            print_lots(&coordinator.get_all_lots(), cli.format)?;
        }
        Some(Commands::Update {
            ref item_id,
            remove,
            price,
            ref condition,
        }) => {
            let (store, coordinator) = build_engine(&cli, &config)?;
            coordinator.trigger_full_rebuild().await?;

            if remove {
                if store.remove(item_id).await.is_none() {
                    bail!("No item {} in the catalog", item_id);
                }
            } else if price.is_some() || condition.is_some() {
                let Some(mut item) = store.get_item(item_id).await? else {
                    bail!("No item {} in the catalog", item_id);
                };
                if let Some(price) = price {
                    item.estimated_price = price;
                }
                if let Some(condition) = condition {
                    item.condition = Some(condition.clone());
                }
                item.updated_at = chrono::Utc::now();
                store.upsert(item).await;
            }

            let report = coordinator.notify_item_changed(item_id).await?;
            print_report(&report, cli.format)?;
            if cli.format == OutputFormat::Table {
                println!();
            }
            print_lots(&coordinator.get_all_lots(), cli.format)?;
        }
        Some(Commands::Cache { ref action }) => {
            let path = config.cache.resolved_db_path()?;
            let cache = CacheManager::new(&path)
                .with_context(|| format!("Failed to open cache at {}", path.display()))?;
            match action {
                CacheAction::Clear => {
                    let removed = cache.clear(Some(SNAPSHOT_NAMESPACE))?;
                    println!("Removed {} cached snapshots", removed);
                }
                CacheAction::Prune { older_than_hours } => {
                    let removed = cache.prune_older_than(chrono::Duration::hours(*older_than_hours))?;
                    println!(
                        "Removed {} snapshots older than {}h, {} left",
                        removed,
                        older_than_hours,
                        cache.len(SNAPSHOT_NAMESPACE)?
                    );
                }
            }
        }
        Some(Commands::Config { ref action }) => match action {
            ConfigAction::Show => {
                let path = Config::config_path()?;
                println!("# {}", path.display());
                // credentials stay out of the terminal
                let mut shown = config.clone();
                shown.market.app_id = shown.market.app_id.map(|_| "<set>".to_string());
                shown.market.bearer_token = shown.market.bearer_token.map(|_| "<set>".to_string());
                print!("{}", shown.to_toml()?);
            }
            ConfigAction::Init { force } => {
                let path = Config::config_path()?;
                if path.exists() && !force {
                    bail!("{} already exists, pass --force to overwrite", path.display());
                }
                let written = Config::default().save()?;
                println!("Wrote {}", written.display());
            }
        },
        None => {
            println!("No command specified. Try --help");
        }
    }

    Ok(())
}

fn build_engine(
    cli: &Cli,
    config: &Config,
) -> anyhow::Result<(Arc<MemoryItemStore>, IncrementalUpdateCoordinator)> {
    let Some(items_path) = &cli.items else {
        bail!("--items <FILE> is required for this command");
    };
    let store = Arc::new(
        MemoryItemStore::load_json(items_path)
            .with_context(|| format!("Failed to load items from {}", items_path.display()))?,
    );

    if !config.market.has_credentials() {
        tracing::warn!(
            "No marketplace credentials (LOTWISE_EBAY_APP_ID / LOTWISE_EBAY_TOKEN), lots will use per-item estimates"
        );
    }
    let oracle = Arc::new(MarketplaceOracle::new(
        config.market.to_client_config(config.cache.oracle_timeout()),
    )?);

    let cache = if cli.no_cache {
        EnrichmentCache::new(oracle, config.cache.ttl(), config.cache.oracle_timeout())
    } else {
        EnrichmentCache::from_config(oracle, &config.cache)?
    };

    let coordinator =
        IncrementalUpdateCoordinator::from_config(store.clone(), Arc::new(cache), config);
    Ok((store, coordinator))
}

fn print_lots(lots: &[Lot], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(lots)?),
        OutputFormat::Table => {
            if lots.is_empty() {
                println!("No lots - not enough items share an author, series or theme");
                return Ok(());
            }
            println!(
                "{:>3}  {:<6}  {:>9}  {:>5}  {}",
                "#", "conf", "value", "items", "lot"
            );
            for (rank, lot) in lots.iter().enumerate() {
                let stale = if lot.is_stale() { " (stale)" } else { "" };
                println!(
                    "{:>3}  {:<6}  {:>9}  {:>5}  {}{}",
                    rank + 1,
                    lot.confidence,
                    format!("${:.2}", lot.estimated_value),
                    lot.skeleton.len(),
                    lot.name,
                    stale
                );
                for line in &lot.justification {
                    println!("{:>32}- {}", "", line);
                }
            }
        }
    }
    Ok(())
}

fn print_report(report: &CycleReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Table => {
            let kind = if report.full_rebuild { "full rebuild" } else { "incremental" };
            println!(
                "{} cycle: {} affected, {} rescored, {} removed in {:?}",
                kind,
                report.affected.len(),
                report.rescored,
                report.removed,
                report.duration
            );
            for key in &report.affected {
                println!("  {}", key);
            }
        }
    }
    Ok(())
}
