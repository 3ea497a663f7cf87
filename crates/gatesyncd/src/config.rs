//! gatesync.toml configuration.
//!
//! Every key has a default, so an empty file (or no file) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gatesync_api::{ApiConfig, EmptyBlockResponse};
use gatesync_ingest::{IngestConfig, ProvisionConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub bundles: BundlesConfig,
    pub ingest: IngestSection,
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub block_timeout_secs: u64,
    pub empty_block_response: EmptyBlockResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlesConfig {
    pub dir: PathBuf,
    pub fetch_attempts: u32,
    pub fetch_backoff_ms: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub deployment_table: String,
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Outcomes are POSTed here; reporting is off when unset.
    pub status_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            block_timeout_secs: 120,
            empty_block_response: EmptyBlockResponse::NotFound,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/gatesync"),
        }
    }
}

impl Default for BundlesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/tmp/gatesync/bundles"),
            fetch_attempts: 3,
            fetch_backoff_ms: 200,
            fetch_timeout_secs: 30,
            fetch_concurrency: 4,
        }
    }
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            deployment_table: IngestConfig::default().deployment_table,
            debounce_ms: 1000,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            status_url: None,
            timeout_secs: 10,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn api(&self) -> ApiConfig {
        ApiConfig {
            block_timeout: Duration::from_secs(self.server.block_timeout_secs),
            empty_block_response: self.server.empty_block_response,
        }
    }

    pub fn provision(&self) -> ProvisionConfig {
        ProvisionConfig {
            fetch_attempts: self.bundles.fetch_attempts.max(1),
            fetch_backoff: Duration::from_millis(self.bundles.fetch_backoff_ms),
            fetch_concurrency: self.bundles.fetch_concurrency.max(1),
        }
    }

    pub fn ingest(&self) -> IngestConfig {
        IngestConfig {
            deployment_table: self.ingest.deployment_table.clone(),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.ingest.debounce_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.bundles.fetch_timeout_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }
}
