use crate::config::ScheduleConfig;
use crate::fetch::PageSource;
use crate::model::{CycleReport, Stage};
use crate::pipeline::Pipeline;
use serde::Serialize;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// Zero when the cycle overran: the next one starts at once.
pub fn sleep_after(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerSummary {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub admitted: usize,
    pub duplicates: usize,
    pub last_report: Option<CycleReport>,
}

impl SchedulerSummary {
    fn record(&mut self, report: CycleReport) {
        self.cycles += 1;
        if report.is_failed() {
            self.failed_cycles += 1;
        }
        self.admitted += report.admitted;
        self.duplicates += report.duplicates;
        self.last_report = Some(report);
    }
}

pub struct IngestionScheduler<F: PageSource> {
    pipeline: Pipeline<F>,
    interval: Duration,
    shutdown_grace: Duration,
    max_cycles: Option<u64>,
}

impl<F: PageSource> IngestionScheduler<F> {
    pub fn new(pipeline: Pipeline<F>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            shutdown_grace: Duration::from_secs(10),
            max_cycles: None,
        }
    }

    pub fn from_config(pipeline: Pipeline<F>, config: &ScheduleConfig) -> Self {
        Self::new(pipeline, config.interval()).with_shutdown_grace(config.shutdown_grace())
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    pub fn pipeline(&self) -> &Pipeline<F> {
        &self.pipeline
    }

    // An in-flight cycle gets `shutdown_grace` after cancellation before it is dropped.
    pub async fn run(&mut self, shutdown: CancellationToken) -> SchedulerSummary {
        let mut summary = SchedulerSummary::default();
        let mut cycle: u64 = 0;
        info!(
            interval_secs = self.interval.as_secs(),
            stage = %Stage::Idle,
            "scheduler started"
        );

        while !shutdown.is_cancelled() {
            cycle += 1;
            let started = Instant::now();
            info!(cycle, stage = %Stage::Fetching, "cycle start");

            let report = tokio::select! {
                report = self.pipeline.run_cycle(cycle) => Some(report),
                _ = grace_expired(&shutdown, self.shutdown_grace) => None,
            };
            let Some(report) = report else {
                warn!(cycle, "shutdown grace elapsed; abandoning in-flight cycle");
                break;
            };
            summary.record(report);

            if self.max_cycles.is_some_and(|max| cycle >= max) {
                info!(cycle, "cycle limit reached");
                break;
            }

            let elapsed = started.elapsed();
            let pause = sleep_after(self.interval, elapsed);
            info!(
                cycle,
                stage = %Stage::Sleeping,
                elapsed_ms = elapsed.as_millis() as u64,
                sleep_ms = pause.as_millis() as u64,
                "waiting for next cycle"
            );

            tokio::select! {
                _ = sleep(pause) => {}
                _ = shutdown.cancelled() => {
                    info!(cycle, "shutdown requested while sleeping");
                    break;
                }
            }
        }

        self.pipeline.shutdown().await;
        info!(
            cycles = summary.cycles,
            failed = summary.failed_cycles,
            admitted = summary.admitted,
            "scheduler stopped"
        );
        summary
    }
}

async fn grace_expired(shutdown: &CancellationToken, grace: Duration) {
    shutdown.cancelled().await;
    warn!(grace_secs = grace.as_secs(), "shutdown requested mid-cycle");
    sleep(grace).await;
}
