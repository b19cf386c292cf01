//! Free-form dashboard timestamps to naive wall-clock values.
//!
//! The dashboard publishes local times with no zone or offset. Parsed values
//! stay naive: no zone is assumed and nothing is converted to UTC, so two
//! records from either side of a DST change may compare out of order. Callers
//! that need absolute instants must attach a zone themselves.

use crate::config::default_timestamp_formats;
use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex must be valid"));

#[derive(Debug, Clone)]
pub struct TimestampNormalizer {
    formats: Vec<String>,
}

impl Default for TimestampNormalizer {
    fn default() -> Self {
        Self::new(default_timestamp_formats())
    }
}

impl TimestampNormalizer {
    pub fn new(formats: Vec<String>) -> Self {
        Self { formats }
    }

    pub fn normalize(&self, text: &str) -> Option<NaiveDateTime> {
        let cleaned = WHITESPACE_RUN.replace_all(text.trim(), " ");
        if cleaned.is_empty() {
            return None;
        }

        // First match wins.
        self.formats
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(&cleaned, format).ok())
    }
}
