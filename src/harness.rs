use crate::config::{FetchMode, IngestConfig};
use crate::fetch::{PageFetcher, RenderWait, RetryPolicy};
use crate::pipeline::Pipeline;
use crate::render::DashboardRenderer;
use crate::store::open_store;
use anyhow::{Result, bail};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HarnessReport {
    pub first_cycle_parsed: usize,
    pub first_cycle_rejected: usize,
    pub first_cycle_admitted: usize,
    pub first_cycle_duplicates: usize,
    pub second_cycle_admitted: usize,
    pub second_cycle_duplicates: usize,
    pub total_events: usize,
}

pub async fn run_harness(config: &IngestConfig) -> Result<HarnessReport> {
    if config.fetch.mode != FetchMode::File {
        bail!("harness requires fetch.mode = \"file\"");
    }
    if config.store.path.exists() {
        std::fs::remove_file(&config.store.path)?;
    }

    let renderer = DashboardRenderer::from_config(&config.fetch)?;
    let fetcher = PageFetcher::start(
        renderer,
        RenderWait::from_config(config),
        RetryPolicy::from_config(config),
    )
    .await?;
    let store = open_store(&config.store)?;
    let mut pipeline = Pipeline::from_config(config, fetcher, store)?;

    let first = pipeline.run_cycle(1).await;
    let second = pipeline.run_cycle(2).await;
    pipeline.shutdown().await;

    for report in [&first, &second] {
        if report.is_failed() {
            bail!("harness cycle {} failed: {:?}", report.cycle, report.outcome);
        }
    }

    let total_events = pipeline.store().stats()?.total_events;

    Ok(HarnessReport {
        first_cycle_parsed: first.rows_parsed,
        first_cycle_rejected: first.rows_rejected,
        first_cycle_admitted: first.admitted,
        first_cycle_duplicates: first.duplicates,
        second_cycle_admitted: second.admitted,
        second_cycle_duplicates: second.duplicates,
        total_events,
    })
}
