use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Runtime policy. Every numeric knob the control plane depends on lives
/// here rather than in code: retry ceilings and lease cadence in
/// particular are deployment decisions, not constants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RudderConfig {
    pub store: StoreConfig,
    pub worker: WorkerConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StoreConfig {
    /// Path of the sqlite state database, relative to the working
    /// directory.
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "state.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WorkerConfig {
    /// Concurrent messages a worker processes.
    pub parallelism: usize,
    /// Idle sleep between empty dequeues, milliseconds.
    pub poll_interval_ms: u64,
    /// Queue lease duration, seconds.
    pub lease_secs: u64,
    /// How often an in-progress deploy extends its lease, seconds.
    /// Must be comfortably below `lease_secs`.
    pub lease_extend_secs: u64,
    /// Dead-letter ceiling: a message delivered more times than this is
    /// routed to a terminal Failed status instead of redelivered.
    pub max_dequeue_count: u32,
    /// Bounded re-read/re-apply retries for optimistic-concurrency
    /// conflicts on internal state reconciliation.
    pub cas_retry_limit: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            poll_interval_ms: 250,
            lease_secs: 60,
            lease_extend_secs: 20,
            max_dequeue_count: 5,
            cas_retry_limit: 5,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn lease_extend_interval(&self) -> Duration {
        Duration::from_secs(self.lease_extend_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Renderings with at most this many output resources deploy inside
    /// the request; larger ones go through the async subsystem.
    pub inline_deploy_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inline_deploy_limit: 2,
        }
    }
}

impl RudderConfig {
    /// Load from a YAML file; a missing path yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: RudderConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}
