use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::summarizer::SummaryLength;

const APP_DIR: &str = "readbrief";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub refresh: RefreshConfig,
    pub digest: DigestConfig,
    pub summary: SummaryConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub feed_concurrency: usize,
    pub article_concurrency: usize,
    pub prefetch_per_feed: usize,
    pub inter_batch_delay_ms: u64,
    pub item_timeout_secs: u64,
    pub run_timeout_secs: u64,
    pub highlights_per_feed: usize,
    pub latest_snapshot_size: usize,
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub cooldown_secs: u64,
    pub quota: usize,
    /// Upper bound imposed by the caller's entitlement, if any.
    pub entitlement_limit: Option<usize>,
    pub auto_expand: bool,
    pub seen_capacity: usize,
    pub min_summary_chars: usize,
    /// Per-feed bound on a digest pass's fetch.
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub default_length: SummaryLength,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            feed_concurrency: 2,
            article_concurrency: 3,
            prefetch_per_feed: 6,
            inter_batch_delay_ms: 250,
            item_timeout_secs: 10,
            run_timeout_secs: 30,
            highlights_per_feed: 3,
            latest_snapshot_size: 20,
            interval_minutes: 30,
        }
    }
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 60,
            quota: 3,
            entitlement_limit: None,
            auto_expand: true,
            seen_capacity: 500,
            min_summary_chars: 24,
            fetch_timeout_secs: 10,
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 400,
            default_length: SummaryLength::Short,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            max_body_bytes: 1024 * 1024,
            user_agent: "ReadBrief/0.1".to_string(),
        }
    }
}

impl RefreshConfig {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1) * 60)
    }
}

impl DigestConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Number of new items a single pass may surface.
    pub fn effective_quota(&self) -> usize {
        match self.entitlement_limit {
            Some(limit) => self.quota.min(limit),
            None => self.quota,
        }
    }
}

impl SummaryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PipelineConfig {
    /// Directory holding the config file and every persisted store.
    pub fn data_dir() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        let app_dir = config_dir.join(APP_DIR);
        std::fs::create_dir_all(&app_dir)?;
        Ok(app_dir)
    }

    /// Loads `config.json` from `dir`, or falls back to defaults and tries to write them back.
    pub fn load(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join("config.json");
        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "unable to load config, using defaults");
                let config = Self::default();
                if let Err(save_err) = config.save_to(&path) {
                    warn!(error = %save_err, "unable to write default config");
                }
                config
            }
        }
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
