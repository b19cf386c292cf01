use crate::config::{StoreBackend, StoreConfig};
use crate::model::{DISPLAY_DATETIME_FORMAT, Fingerprint, Record, StoreStats, StoredEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
    #[error("failed to persist record {fingerprint}: {message}")]
    Persist {
        fingerprint: Fingerprint,
        message: String,
    },
}

impl StoreError {
    fn unavailable(err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable {
            message: err.to_string(),
        }
    }

    fn persist(record: &Record, err: impl std::fmt::Display) -> Self {
        StoreError::Persist {
            fingerprint: record.fingerprint().clone(),
            message: err.to_string(),
        }
    }
}

pub trait Store {
    fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError>;

    fn persist(&mut self, record: &Record) -> Result<String, StoreError>;

    // Newest `occurred_at` first.
    fn events(&self, limit: Option<usize>) -> Result<Vec<StoredEvent>, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats::from_events(&self.events(None)?))
    }
}

pub fn open_store(config: &StoreConfig) -> Result<Box<dyn Store>> {
    let store: Box<dyn Store> = match config.backend {
        StoreBackend::Json => Box::new(JsonStore::open(&config.path)?),
        StoreBackend::Sqlite => Box::new(SqliteStore::open(&config.path)?),
    };
    Ok(store)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JsonState {
    schema_version: u32,
    events: BTreeMap<String, StoredEvent>,
}

impl Default for JsonState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            events: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    state: JsonState,
}

impl JsonStore {
    pub fn open(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read state file {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse state file {}", path.display()))?
        } else {
            JsonState::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create state directory {}", parent.display())
            })?;
        }

        let serialized = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.path, serialized)
            .with_context(|| format!("failed to write state file {}", self.path.display()))?;
        Ok(())
    }
}

impl Store for JsonStore {
    fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        Ok(self
            .state
            .events
            .values()
            .any(|event| event.record.fingerprint() == fingerprint))
    }

    fn persist(&mut self, record: &Record) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.state.events.insert(
            id.clone(),
            StoredEvent {
                id: id.clone(),
                record: record.clone(),
                ingested_at: Utc::now(),
            },
        );

        if let Err(err) = self.save() {
            self.state.events.remove(&id);
            return Err(StoreError::persist(record, format!("{err:#}")));
        }
        Ok(id)
    }

    fn events(&self, limit: Option<usize>) -> Result<Vec<StoredEvent>, StoreError> {
        let mut events = self.state.events.values().cloned().collect::<Vec<_>>();
        events.sort_by(|a, b| {
            b.record
                .occurred_at()
                .cmp(&a.record.occurred_at())
                .then(b.ingested_at.cmp(&a.ingested_at))
        });
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        Ok(events)
    }
}

const SQLITE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    location TEXT NOT NULL,
    datetime TEXT NOT NULL,
    channel TEXT NOT NULL,
    status TEXT NOT NULL,
    fingerprint TEXT NOT NULL UNIQUE,
    ingested_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_datetime ON events (datetime);
";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite store {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite store")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SQLITE_SCHEMA)
            .context("failed to initialise sqlite schema")?;
        Ok(Self { conn })
    }
}

struct EventRow {
    id: i64,
    title: String,
    location: String,
    datetime: String,
    channel: String,
    status: String,
    ingested_at: String,
}

impl EventRow {
    fn into_stored(self) -> Result<StoredEvent, StoreError> {
        let occurred_at = NaiveDateTime::parse_from_str(&self.datetime, DISPLAY_DATETIME_FORMAT)
            .map_err(|err| {
                StoreError::unavailable(format!(
                    "bad datetime {:?} in row {}: {err}",
                    self.datetime, self.id
                ))
            })?;
        let ingested_at = DateTime::parse_from_rfc3339(&self.ingested_at)
            .map_err(|err| {
                StoreError::unavailable(format!(
                    "bad ingested_at {:?} in row {}: {err}",
                    self.ingested_at, self.id
                ))
            })?
            .with_timezone(&Utc);

        Ok(StoredEvent {
            id: self.id.to_string(),
            record: Record::new(
                self.title,
                self.location,
                occurred_at,
                self.channel,
                self.status,
            ),
            ingested_at,
        })
    }
}

impl Store for SqliteStore {
    fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM events WHERE fingerprint = ?1)",
                params![fingerprint.as_str()],
                |row| row.get::<_, bool>(0),
            )
            .map_err(StoreError::unavailable)
    }

    fn persist(&mut self, record: &Record) -> Result<String, StoreError> {
        self.conn
            .execute(
                "INSERT INTO events (title, location, datetime, channel, status, fingerprint, ingested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.title(),
                    record.location(),
                    record
                        .occurred_at()
                        .format(DISPLAY_DATETIME_FORMAT)
                        .to_string(),
                    record.channel(),
                    record.status(),
                    record.fingerprint().as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|err| StoreError::persist(record, err))?;
        Ok(self.conn.last_insert_rowid().to_string())
    }

    fn events(&self, limit: Option<usize>) -> Result<Vec<StoredEvent>, StoreError> {
        let limit = limit.map_or(-1, |v| i64::try_from(v).unwrap_or(i64::MAX));
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, location, datetime, channel, status, ingested_at
                 FROM events ORDER BY datetime DESC, id DESC LIMIT ?1",
            )
            .map_err(StoreError::unavailable)?;

        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(EventRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    location: row.get(2)?,
                    datetime: row.get(3)?,
                    channel: row.get(4)?,
                    status: row.get(5)?,
                    ingested_at: row.get(6)?,
                })
            })
            .map_err(StoreError::unavailable)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(StoreError::unavailable)?.into_stored()?);
        }
        Ok(events)
    }
}
