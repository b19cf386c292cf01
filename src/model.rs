use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

pub const CANONICAL_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub const DISPLAY_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const READABLE_DATETIME_FORMAT: &str = "%B %-d, %Y at %-I:%M %p";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub container_index: usize,
    pub row_index: usize,
    pub title: String,
    pub location: String,
    pub timestamp: String,
    pub channel: String,
    pub status: String,
}

impl RawRow {
    pub fn from_cells<S: AsRef<str>>(cells: &[S]) -> Option<Self> {
        if cells.len() < 5 {
            return None;
        }
        Some(Self {
            container_index: 0,
            row_index: 0,
            title: cells[0].as_ref().trim().to_string(),
            location: cells[1].as_ref().trim().to_string(),
            timestamp: cells[2].as_ref().trim().to_string(),
            channel: cells[3].as_ref().trim().to_string(),
            status: cells[4].as_ref().trim().to_string(),
        })
    }

    pub fn at(mut self, container_index: usize, row_index: usize) -> Self {
        self.container_index = container_index;
        self.row_index = row_index;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(
        title: &str,
        location: &str,
        occurred_at: NaiveDateTime,
        channel: &str,
        status: &str,
    ) -> Self {
        let occurred_at = occurred_at.format(CANONICAL_DATETIME_FORMAT).to_string();
        let mut hasher = Sha256::new();
        for field in [title, location, occurred_at.as_str(), channel, status] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Stored fingerprints are never trusted; deserializing recomputes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RecordFields")]
pub struct Record {
    title: String,
    location: String,
    occurred_at: NaiveDateTime,
    channel: String,
    status: String,
    fingerprint: Fingerprint,
}

impl Record {
    pub(crate) fn new(
        title: String,
        location: String,
        occurred_at: NaiveDateTime,
        channel: String,
        status: String,
    ) -> Self {
        let fingerprint = Fingerprint::compute(&title, &location, occurred_at, &channel, &status);
        Self {
            title,
            location,
            occurred_at,
            channel,
            status,
            fingerprint,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn occurred_at(&self) -> NaiveDateTime {
        self.occurred_at
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

#[derive(Deserialize)]
struct RecordFields {
    title: String,
    location: String,
    occurred_at: NaiveDateTime,
    channel: String,
    status: String,
}

impl From<RecordFields> for Record {
    fn from(fields: RecordFields) -> Self {
        Record::new(
            fields.title,
            fields.location,
            fields.occurred_at,
            fields.channel,
            fields.status,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: String,
    pub record: Record,
    pub ingested_at: DateTime<Utc>,
}

impl StoredEvent {
    pub fn view(&self) -> EventView {
        EventView {
            id: self.id.clone(),
            title: self.record.title.clone(),
            location: self.record.location.clone(),
            datetime: self
                .record
                .occurred_at
                .format(DISPLAY_DATETIME_FORMAT)
                .to_string(),
            datetime_readable: self
                .record
                .occurred_at
                .format(READABLE_DATETIME_FORMAT)
                .to_string(),
            channel: self.record.channel.clone(),
            status: self.record.status.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EventView {
    pub id: String,
    pub title: String,
    pub location: String,
    pub datetime: String,
    pub datetime_readable: String,
    pub channel: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StoreStats {
    pub total_events: usize,
    pub by_channel: BTreeMap<String, usize>,
    pub earliest: Option<String>,
    pub latest: Option<String>,
}

impl StoreStats {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a StoredEvent>) -> Self {
        let mut stats = StoreStats::default();
        let mut earliest: Option<NaiveDateTime> = None;
        let mut latest: Option<NaiveDateTime> = None;

        for event in events {
            stats.total_events += 1;
            *stats
                .by_channel
                .entry(event.record.channel.clone())
                .or_default() += 1;
            let at = event.record.occurred_at;
            earliest = Some(earliest.map_or(at, |v| v.min(at)));
            latest = Some(latest.map_or(at, |v| v.max(at)));
        }

        stats.earliest = earliest.map(|v| v.format(DISPLAY_DATETIME_FORMAT).to_string());
        stats.latest = latest.map(|v| v.format(DISPLAY_DATETIME_FORMAT).to_string());
        stats
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Fetching,
    Parsing,
    Persisting,
    Sleeping,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Fetching => "fetching",
            Stage::Parsing => "parsing",
            Stage::Persisting => "persisting",
            Stage::Sleeping => "sleeping",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed,
    Failed { stage: Stage, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub html_bytes: usize,
    pub containers: usize,
    pub rows_parsed: usize,
    pub rows_rejected: usize,
    pub admitted: usize,
    pub duplicates: usize,
    pub persist_failures: usize,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            html_bytes: 0,
            containers: 0,
            rows_parsed: 0,
            rows_rejected: 0,
            admitted: 0,
            duplicates: 0,
            persist_failures: 0,
            outcome: CycleOutcome::Completed,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Failed { .. })
    }
}
