use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use incident_ingest::config::{IngestConfig, load_config, load_config_or_default};
use incident_ingest::fetch::{PageFetcher, RenderWait, RetryPolicy};
use incident_ingest::harness::run_harness;
use incident_ingest::model::{EventView, StoredEvent};
use incident_ingest::pipeline::Pipeline;
use incident_ingest::render::DashboardRenderer;
use incident_ingest::scheduler::IngestionScheduler;
use incident_ingest::store::open_store;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "ingest.toml";

#[derive(Parser, Debug)]
#[command(name = "incident-ingest", about = "Polls an incident dashboard and stores new rows")]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run {
        #[arg(long)]
        interval_secs: Option<u64>,
        #[arg(long)]
        cycles: Option<u64>,
    },
    Once,
    Events {
        #[arg(long)]
        latest: Option<usize>,
    },
    Stats,
    Validate,
    Harness,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_config_or_default(Path::new(DEFAULT_CONFIG_PATH))?,
    };

    match cli.command {
        Commands::Run {
            interval_secs,
            cycles,
        } => {
            if let Some(interval_secs) = interval_secs {
                config.schedule.interval_secs = interval_secs;
                config.validate()?;
            }

            let pipeline = build_pipeline(&config).await?;
            let mut scheduler =
                IngestionScheduler::from_config(pipeline, &config.schedule).with_max_cycles(cycles);

            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("interrupt received; shutting down"),
                    Err(err) => warn!(error = %err, "failed to listen for interrupt"),
                }
                signal.cancel();
            });

            let summary = scheduler.run(shutdown).await;
            info!(
                cycles = summary.cycles,
                failed = summary.failed_cycles,
                admitted = summary.admitted,
                duplicates = summary.duplicates,
                "run summary"
            );
        }
        Commands::Once => {
            let mut pipeline = build_pipeline(&config).await?;
            let report = pipeline.run_cycle(1).await;
            pipeline.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Events { latest } => {
            let store = open_store(&config.store)?;
            let views = store
                .events(latest)?
                .iter()
                .map(StoredEvent::view)
                .collect::<Vec<EventView>>();
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        Commands::Stats => {
            let store = open_store(&config.store)?;
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
        }
        Commands::Validate => {
            let path = cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
            println!("OK: {} ({})", config.source.url, path.display());
        }
        Commands::Harness => {
            let report = run_harness(&config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn build_pipeline(
    config: &IngestConfig,
) -> Result<Pipeline<PageFetcher<DashboardRenderer>>> {
    let store = open_store(&config.store)?;
    let renderer = DashboardRenderer::from_config(&config.fetch)?;
    let fetcher = PageFetcher::start(
        renderer,
        RenderWait::from_config(config),
        RetryPolicy::from_config(config),
    )
    .await
    .context("could not start the page fetcher")?;
    Pipeline::from_config(config, fetcher, store)
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}
