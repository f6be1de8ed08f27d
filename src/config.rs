use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::fetcher::{Backoff, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "http://www.nscb.gov.ph/activestats/psgc";
const ENV_PREFIX: &str = "PSGC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Comma-suffixed fixed-width columns
    Fixed,
    /// Comma-separated values, quoted where needed, no header row
    Csv,
    /// One JSON object per line
    Jsonl,
}

/// Immutable for the duration of a run once validated.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub first_page: u32,
    pub last_page: u32,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub backoff: Backoff,
    pub timeout_secs: u64,
    pub out_dir: PathBuf,
    pub format: OutputFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: DEFAULT_BASE_URL.to_string(),
            first_page: 1,
            last_page: 1,
            concurrency: 4,
            max_attempts: 10,
            retry_delay_secs: 5,
            backoff: Backoff::Fixed,
            timeout_secs: 30,
            out_dir: PathBuf::from("."),
            format: OutputFormat::Fixed,
        }
    }
}

impl Settings {
    /// Defaults overlaid with `PSGC_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize::<Settings>())
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.first_page < 1 {
            return Err(ConfigError::FirstPageZero(self.first_page));
        }
        if self.first_page > self.last_page {
            return Err(ConfigError::InvertedRange {
                first: self.first_page,
                last: self.last_page,
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Zero("concurrency"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero("max_attempts"));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Zero("timeout_secs"));
        }
        match reqwest::Url::parse(&self.base_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(()),
            _ => Err(ConfigError::BaseUrl(self.base_url.clone())),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_secs(self.retry_delay_secs),
            backoff: self.backoff,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn pages(&self) -> std::ops::RangeInclusive<u32> {
        self.first_page..=self.last_page
    }

    pub fn list_url(&self, page: u32) -> String {
        format!("{}/listmun.asp?whichpage={}", self.base(), page)
    }

    /// Detail page for a municipality, from the href found in its list row.
    pub fn detail_url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            return href.to_string();
        }
        format!("{}/{}", self.base(), href.trim_start_matches('/'))
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
