use anyhow::{Context, Result};
use hwalloc_engine::{EngineOptions, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub max_conflict_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub allocation_delay_ms: u64,
    /// Upper bound on one allocation request, retries included.
    pub pass_timeout_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            retry_backoff_ms: 100,
            max_backoff_ms: 2000,
            allocation_delay_ms: 0,
            pass_timeout_secs: 60,
        }
    }
}

impl ControlConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {:?}", path))?;
        let cfg = toml::from_str(&text).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(cfg)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_conflict_retries: self.max_conflict_retries,
            allocation_delay: Duration::from_millis(self.allocation_delay_ms),
            backoff: Arc::new(ExponentialBackoff {
                base: Duration::from_millis(self.retry_backoff_ms),
                max: Duration::from_millis(self.max_backoff_ms.max(self.retry_backoff_ms)),
            }),
        }
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }
}

pub fn default_db_path() -> PathBuf {
    let mut dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("hwalloc");
    dir.push("hwalloc.db");
    dir
}
