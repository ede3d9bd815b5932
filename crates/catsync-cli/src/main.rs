use std::sync::Arc;

use anyhow::{Context, Result};
use catsync_core::TenantId;
use catsync_storage::PgRecordStore;
use catsync_sync::{RunOutcome, SourceRegistry, SyncConfig, SyncEngine, SyncScheduler};
use catsync_web::AppState;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "catsync-cli")]
#[command(about = "External catalog synchronization command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync pass and print its counters.
    Sync {
        /// Only sync this tenant instead of every active one.
        #[arg(long)]
        tenant: Option<i64>,
    },
    /// Print the enabled feed sources in run order.
    Sources,
    Migrate,
    /// Start the scheduler and the status server.
    Serve,
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}

async fn connect_store(config: &SyncConfig) -> Result<Arc<PgRecordStore>> {
    let store = PgRecordStore::connect(&config.database_url, config.store_timeout)
        .await
        .context("connecting to DATABASE_URL")?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info")?;
    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Sync { tenant: None }) {
        Commands::Sync { tenant } => {
            let store = connect_store(&config).await?;
            let engine = SyncEngine::from_config(&config, store).await?;
            match engine.run_sync(tenant.map(TenantId)).await {
                RunOutcome::Completed(stats) => println!(
                    "sync complete: total={} new={} updated={} errors={}",
                    stats.total_products, stats.new_products, stats.updated_products, stats.errors
                ),
                RunOutcome::Aborted { stats, error } => {
                    anyhow::bail!("sync aborted after {} errors: {error}", stats.errors)
                }
                RunOutcome::Skipped => println!("sync already running; skipped"),
            }
        }
        Commands::Sources => {
            let registry = SourceRegistry::load(&config.sources_path).await?;
            for source in registry.active_sources() {
                println!(
                    "{:>3}  {:<24} {:<13} {}",
                    source.priority,
                    source.name,
                    source.dialect.as_str(),
                    source.url
                );
            }
        }
        Commands::Migrate => {
            let store = connect_store(&config).await?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            let store = connect_store(&config).await?;
            let engine = Arc::new(SyncEngine::from_config(&config, store).await?);

            let mut scheduler = if config.scheduler_enabled {
                let scheduler = Arc::new(SyncScheduler::new(
                    Arc::clone(&engine),
                    config.schedule_settings(),
                ));
                Some(scheduler.start().await?)
            } else {
                info!("scheduler disabled; manual triggers only");
                None
            };

            tokio::select! {
                served = catsync_web::serve(AppState::new(engine), config.web_port) => served?,
                _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
            }

            if let Some(scheduler) = scheduler.as_mut() {
                scheduler.shutdown().await.context("stopping scheduler")?;
            }
        }
    }

    Ok(())
}
