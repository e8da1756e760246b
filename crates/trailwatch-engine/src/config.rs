//! Engine configuration.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```toml
//! regions = ["us-east-1", "us-west-2"]
//! download_dir = "/tmp/trailwatch-audit"
//!
//! [pools]
//! log_workers = 4
//!
//! [retry]
//! attempts = 10
//! backoff_ms = 1000
//!
//! [rules]
//! flow_logs = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};
use trailwatch_contracts::region::supported_regions;
use trailwatch_core::progress::{AuditTask, Task, TaskKind};
use trailwatch_policy::RuleSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Regions whose digest chains are walked.
    pub regions: Vec<String>,
    /// Where download mode mirrors the trail. Wiped at the start of each run.
    pub download_dir: PathBuf,
    /// Replaces the bundled signing-key table.
    pub public_keys_path: Option<PathBuf>,
    /// Skips account discovery when set.
    pub account_id: Option<String>,
    pub pools: PoolConfig,
    pub retry: RetryConfig,
    pub rules: RuleSet,
    pub weights: WeightConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            regions: supported_regions(),
            download_dir: std::env::temp_dir().join("trailwatch-audit"),
            public_keys_path: None,
            account_id: None,
            pools: PoolConfig::default(),
            retry: RetryConfig::default(),
            rules: RuleSet::default(),
            weights: WeightConfig::default(),
        }
    }
}

/// Worker counts. The region setup pool is always one worker per region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub digest_workers: usize,
    pub log_workers: usize,
    pub discovery_workers: usize,
    pub transfer_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            digest_workers: 2,
            log_workers: 3,
            discovery_workers: 2,
            transfer_workers: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Re-download attempts per file, and transfer retry rounds.
    pub attempts: u32,
    pub backoff_ms: u64,
    /// Pause between listing pages.
    pub list_page_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 100,
            backoff_ms: 5000,
            list_page_delay_ms: 250,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn list_page_delay(&self) -> Duration {
        Duration::from_millis(self.list_page_delay_ms)
    }
}

/// Relative stage durations for the progress estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub calculate_download: u32,
    pub download: u32,
    pub process_digests: u32,
    pub process_logs: u32,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            calculate_download: 200,
            download: 1500,
            process_digests: 200,
            process_logs: 100,
        }
    }
}

impl WeightConfig {
    /// A fresh stage list in pipeline order.
    pub fn audit_task(&self) -> AuditTask {
        AuditTask::new(vec![
            Task::new(TaskKind::CalculateDownload, self.calculate_download),
            Task::new(TaskKind::Download, self.download),
            Task::new(TaskKind::ProcessDigests, self.process_digests),
            Task::new(TaskKind::ProcessLogs, self.process_logs),
        ])
    }
}

impl EngineConfig {
    /// Parse `s` as TOML.
    ///
    /// Returns `TrailwatchError::Config` if the TOML is malformed, a value
    /// has the wrong type, or a worker count is zero.
    pub fn from_toml_str(s: &str) -> TrailwatchResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| TrailwatchError::Config {
            reason: format!("failed to parse engine TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> TrailwatchResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| TrailwatchError::Config {
            reason: format!("failed to read config file '{}': {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> TrailwatchResult<()> {
        if self.regions.is_empty() {
            return Err(TrailwatchError::Config {
                reason: "at least one region is required".to_string(),
            });
        }
        let pools = &self.pools;
        for (name, workers) in [
            ("digest_workers", pools.digest_workers),
            ("log_workers", pools.log_workers),
            ("discovery_workers", pools.discovery_workers),
            ("transfer_workers", pools.transfer_workers),
        ] {
            if workers == 0 {
                return Err(TrailwatchError::Config {
                    reason: format!("pools.{name} must be at least 1"),
                });
            }
        }
        Ok(())
    }
}
