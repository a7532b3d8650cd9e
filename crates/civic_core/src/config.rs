use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const API_KEY_ENV: &str = "LEGISCAN_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub min_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub reference_ttl_days: i64, // sessions and rosters
    pub votes_ttl_hours: i64,
    pub max_changed_bills: usize,
    pub db_path: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.legiscan.com/".to_string(),
            min_interval_ms: 1100,
            request_timeout_secs: 15,
            reference_ttl_days: 7,
            votes_ttl_hours: 24,
            max_changed_bills: 20,
            db_path: "larue_cache.db".to_string(),
        }
    }
}

impl SyncConfig {
    /// Loads a TOML config file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: SyncConfig = toml::from_str(&raw).context("Failed to parse sync config")?;
        Ok(config)
    }

    /// The configured key, falling back to `$LEGISCAN_API_KEY`. Empty
    /// strings count as unset.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reference_ttl(&self) -> time::Duration {
        time::Duration::days(self.reference_ttl_days)
    }

    pub fn votes_ttl(&self) -> time::Duration {
        time::Duration::hours(self.votes_ttl_hours)
    }
}
