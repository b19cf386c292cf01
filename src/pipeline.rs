use crate::assemble::RecordAssembler;
use crate::config::IngestConfig;
use crate::dedup::{Admission, DedupGate};
use crate::fetch::PageSource;
use crate::model::{CycleOutcome, CycleReport, Stage};
use crate::parser::TableParser;
use crate::store::{Store, StoreError};
use crate::timestamp::TimestampNormalizer;
use anyhow::Result;
use tracing::{debug, info, warn};

pub struct Pipeline<F: PageSource> {
    url: String,
    fetcher: F,
    parser: TableParser,
    assembler: RecordAssembler,
    store: Box<dyn Store>,
}

struct CycleFailure {
    stage: Stage,
    reason: String,
}

impl CycleFailure {
    fn new(stage: Stage, err: impl std::fmt::Display) -> Self {
        Self {
            stage,
            reason: err.to_string(),
        }
    }
}

impl<F: PageSource> Pipeline<F> {
    pub fn new(
        url: impl Into<String>,
        fetcher: F,
        parser: TableParser,
        assembler: RecordAssembler,
        store: Box<dyn Store>,
    ) -> Self {
        Self {
            url: url.into(),
            fetcher,
            parser,
            assembler,
            store,
        }
    }

    pub fn from_config(config: &IngestConfig, fetcher: F, store: Box<dyn Store>) -> Result<Self> {
        let parser = TableParser::new(&config.source.container_selector)?;
        let assembler =
            RecordAssembler::new(TimestampNormalizer::new(config.timestamp.formats.clone()));
        Ok(Self::new(
            config.source.url.clone(),
            fetcher,
            parser,
            assembler,
            store,
        ))
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    // Failures are folded into the report, never returned.
    pub async fn run_cycle(&mut self, cycle: u64) -> CycleReport {
        let mut report = CycleReport::new(cycle);

        if let Err(failure) = self.try_cycle(&mut report).await {
            warn!(
                cycle,
                stage = %failure.stage,
                error = %failure.reason,
                "cycle failed"
            );
            report.outcome = CycleOutcome::Failed {
                stage: failure.stage,
                reason: failure.reason,
            };
        }

        report
    }

    pub async fn shutdown(&mut self) {
        self.fetcher.shutdown().await;
    }

    async fn try_cycle(&mut self, report: &mut CycleReport) -> Result<(), CycleFailure> {
        let cycle = report.cycle;

        debug!(cycle, stage = %Stage::Fetching, url = %self.url, "fetching page");
        let html = self
            .fetcher
            .fetch(&self.url)
            .await
            .map_err(|err| CycleFailure::new(Stage::Fetching, err))?;
        report.html_bytes = html.len();

        debug!(cycle, stage = %Stage::Parsing, bytes = html.len(), "parsing page");
        let page = self.parser.parse(&html);
        report.containers = page.containers();

        debug!(cycle, stage = %Stage::Persisting, "admitting records");
        let mut gate = DedupGate::new(self.store.as_mut());
        for row in page.rows() {
            report.rows_parsed += 1;
            let (container, row_index) = (row.container_index, row.row_index);

            let record = match self.assembler.assemble(row) {
                Ok(record) => record,
                Err(rejection) => {
                    report.rows_rejected += 1;
                    debug!(
                        cycle,
                        container,
                        row = row_index,
                        reason = %rejection,
                        "row rejected"
                    );
                    continue;
                }
            };

            match gate.admit(&record) {
                Ok(Admission::Admitted(id)) => {
                    report.admitted += 1;
                    info!(
                        cycle,
                        id = %id,
                        title = %record.title(),
                        location = %record.location(),
                        "record admitted"
                    );
                }
                Ok(Admission::Duplicate) => report.duplicates += 1,
                Err(err @ StoreError::Persist { .. }) => {
                    report.persist_failures += 1;
                    warn!(
                        cycle,
                        container,
                        row = row_index,
                        error = %err,
                        "persist failed; record will be re-offered next cycle"
                    );
                }
                Err(err @ StoreError::Unavailable { .. }) => {
                    return Err(CycleFailure::new(Stage::Persisting, err));
                }
            }
        }

        if report.rows_parsed == 0 {
            info!(
                cycle,
                containers = report.containers,
                "zero events observed"
            );
        }

        info!(
            cycle,
            containers = report.containers,
            parsed = report.rows_parsed,
            rejected = report.rows_rejected,
            admitted = report.admitted,
            duplicates = report.duplicates,
            persist_failures = report.persist_failures,
            "cycle complete"
        );
        Ok(())
    }
}
