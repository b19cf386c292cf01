use anyhow::{Context, Result, bail};
use chrono::format::{Item, StrftimeItems};
use scraper::Selector;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct IngestConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub timestamp: TimestampConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            bail!("source.url must not be empty");
        }
        if self.fetch.mode != FetchMode::File {
            Url::parse(&self.source.url)
                .with_context(|| format!("source.url is not a valid url: {}", self.source.url))?;
        }

        for (name, selector) in [
            ("source.container_selector", &self.source.container_selector),
            ("source.marker_selector", &self.source.marker_selector),
        ] {
            if Selector::parse(selector).is_err() {
                bail!("{name} is not a valid css selector: {selector}");
            }
        }

        if self.fetch.mode == FetchMode::File && self.fetch.file_path.is_none() {
            bail!("fetch.file_path is required for file mode");
        }
        if self.fetch.max_attempts == 0 {
            bail!("fetch.max_attempts must be at least 1");
        }
        if self.fetch.page_load_timeout_secs == 0 || self.fetch.marker_timeout_secs == 0 {
            bail!("fetch timeouts must be greater than zero");
        }
        if self.schedule.interval_secs == 0 {
            bail!("schedule.interval_secs must be greater than zero");
        }
        if self.timestamp.formats.is_empty() {
            bail!("timestamp.formats must list at least one format");
        }
        for format in &self.timestamp.formats {
            if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                bail!("timestamp.formats contains an invalid format: {format}");
            }
        }
        if self.store.path.as_os_str().is_empty() {
            bail!("store.path must not be empty");
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_container_selector")]
    pub container_selector: String,
    #[serde(default = "default_container_selector")]
    pub marker_selector: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            container_selector: default_container_selector(),
            marker_selector: default_container_selector(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    #[default]
    Browser,
    Http,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub mode: FetchMode,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default = "default_page_load_timeout_secs")]
    pub page_load_timeout_secs: u64,
    #[serde(default = "default_marker_timeout_secs")]
    pub marker_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,
    #[serde(default = "default_retry_pause_ms")]
    pub retry_pause_ms: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    #[serde(default = "default_chrome_args")]
    pub chrome_args: Vec<String>,
}

impl FetchConfig {
    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn marker_timeout(&self) -> Duration {
        Duration::from_secs(self.marker_timeout_secs)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::Browser,
            file_path: None,
            page_load_timeout_secs: default_page_load_timeout_secs(),
            marker_timeout_secs: default_marker_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_pause_ms: default_retry_pause_ms(),
            user_agent: None,
            headless: true,
            window_width: default_window_width(),
            window_height: default_window_height(),
            chrome_args: default_chrome_args(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimestampConfig {
    #[serde(default = "default_timestamp_formats")]
    pub formats: Vec<String>,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            formats: default_timestamp_formats(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: default_store_path(),
        }
    }
}

pub fn load_config(config_path: &Path) -> Result<IngestConfig> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("failed to read config: {}", config_path.display()))?;
    let mut config: IngestConfig = toml::from_str(&text)
        .with_context(|| format!("failed to parse toml in {}", config_path.display()))?;

    if let Some(file_path) = config.fetch.file_path.take() {
        config.fetch.file_path = Some(resolve_path(config_path, &file_path));
    }
    config.store.path = resolve_path(config_path, &config.store.path);

    config
        .validate()
        .with_context(|| format!("invalid config {}", config_path.display()))?;
    Ok(config)
}

pub fn load_config_or_default(config_path: &Path) -> Result<IngestConfig> {
    if config_path.exists() {
        return load_config(config_path);
    }

    let config = IngestConfig::default();
    config.validate().context("invalid default config")?;
    Ok(config)
}

pub fn resolve_path(base_config_path: &Path, maybe_relative: &Path) -> PathBuf {
    if maybe_relative.is_absolute() {
        return maybe_relative.to_path_buf();
    }

    let parent = base_config_path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(maybe_relative)
}

fn default_true() -> bool {
    true
}

fn default_url() -> String {
    "https://mapportal.phoenix.gov/pfd/apps/dashboards/60bc91a9f225469fb0194b9e9ff623e2".to_string()
}

fn default_container_selector() -> String {
    "div.external-html".to_string()
}

fn default_page_load_timeout_secs() -> u64 {
    30
}

fn default_marker_timeout_secs() -> u64 {
    15
}

fn default_max_attempts() -> u8 {
    3
}

fn default_retry_pause_ms() -> u64 {
    1500
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

fn default_chrome_args() -> Vec<String> {
    vec![
        "--disable-infobars".to_string(),
        "--disable-extensions".to_string(),
        "--disable-gpu".to_string(),
    ]
}

fn default_interval_secs() -> u64 {
    600
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/events.db")
}

pub fn default_timestamp_formats() -> Vec<String> {
    vec![
        "%m/%d/%Y, %I:%M %p".to_string(),
        "%m/%d/%Y %I:%M %p".to_string(),
        "%m-%d-%Y, %I:%M %p".to_string(),
        "%m-%d-%Y %I:%M %p".to_string(),
        "%Y-%m-%d %H:%M:%S".to_string(),
        "%Y-%m-%d %H:%M".to_string(),
        "%Y-%m-%dT%H:%M:%S".to_string(),
        "%Y-%m-%dT%H:%M".to_string(),
    ]
}
