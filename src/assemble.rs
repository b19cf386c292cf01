use crate::model::{RawRow, Record};
use crate::timestamp::TimestampNormalizer;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowRejected {
    #[error("row has an empty title")]
    EmptyTitle,
    #[error("row has an empty timestamp")]
    EmptyTimestamp,
    #[error("unrecognized timestamp {0:?}")]
    TimestampUnrecognized(String),
}

#[derive(Debug, Clone, Default)]
pub struct RecordAssembler {
    normalizer: TimestampNormalizer,
}

impl RecordAssembler {
    pub fn new(normalizer: TimestampNormalizer) -> Self {
        Self { normalizer }
    }

    pub fn assemble(&self, row: RawRow) -> Result<Record, RowRejected> {
        let title = row.title.trim();
        if title.is_empty() {
            return Err(RowRejected::EmptyTitle);
        }

        let timestamp = row.timestamp.trim();
        if timestamp.is_empty() {
            return Err(RowRejected::EmptyTimestamp);
        }

        let occurred_at = self
            .normalizer
            .normalize(timestamp)
            .ok_or_else(|| RowRejected::TimestampUnrecognized(timestamp.to_string()))?;

        Ok(Record::new(
            title.to_string(),
            row.location.trim().to_string(),
            occurred_at,
            row.channel.trim().to_string(),
            row.status.trim().to_string(),
        ))
    }
}
