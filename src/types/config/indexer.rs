use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::types::config::contract::ContractAddresses;

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    pub rpc_url_env_var: String,
    pub database_url_env_var: String,
    pub redis_url_env_var: String,
    /// Hash of the block that precedes the first indexed block.
    pub start_block_hash: String,
    /// Maximum number of blocks indexed in one pass.
    #[serde(default = "default_window")]
    pub block_processing_window: i64,
    #[serde(default = "default_interval")]
    pub block_processing_interval_sec: u64,
    pub contracts: ContractAddresses,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub skip_policy: SkipPolicyConfig,
    #[serde(default)]
    pub rpc: RpcSettings,
}

fn default_window() -> i64 {
    20
}

fn default_interval() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    pub gateways: Vec<String>,
    #[serde(default = "default_metadata_timeout")]
    pub timeout_ms: u64,
}

fn default_metadata_timeout() -> u64 {
    5000
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            gateways: vec!["https://ipfs.io".to_string()],
            timeout_ms: default_metadata_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    pub key: String,
    pub lease_secs: u64,
    /// 0 means a single non-blocking attempt.
    #[serde(default)]
    pub wait_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key: "disc_prov_lock".to_string(),
            lease_secs: 25,
            wait_secs: 0,
        }
    }
}

impl LockConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkipPolicyConfig {
    pub max_skipped_tx: i64,
    /// Identical failures needed before an error counts as confirmed.
    pub confirmations_required: u32,
}

impl Default for SkipPolicyConfig {
    fn default() -> Self {
        Self {
            max_skipped_tx: 100,
            confirmations_required: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcSettings {
    pub requests_per_second: u32,
    pub max_retries: u32,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            requests_per_second: 25,
            max_retries: 5,
        }
    }
}

impl IndexerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        let config: IndexerConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))?;

        anyhow::ensure!(
            config.block_processing_window > 0,
            "block_processing_window must be positive"
        );
        anyhow::ensure!(
            !config.metadata.gateways.is_empty(),
            "at least one metadata gateway is required"
        );
        Ok(config)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.block_processing_interval_sec.max(1))
    }

    pub fn required_env_vars(&self) -> [&str; 3] {
        [
            self.rpc_url_env_var.as_str(),
            self.database_url_env_var.as_str(),
            self.redis_url_env_var.as_str(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let raw = r#"{
            "rpc_url_env_var": "RPC",
            "database_url_env_var": "DB",
            "redis_url_env_var": "REDIS",
            "start_block_hash": "0x00",
            "contracts": { "user_factory": "0x11" }
        }"#;
        let config: IndexerConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.block_processing_window, 20);
        assert_eq!(config.lock.key, "disc_prov_lock");
        assert_eq!(config.skip_policy.max_skipped_tx, 100);
        assert_eq!(config.contracts.user_factory.as_deref(), Some("0x11"));
        assert!(config.contracts.track_factory.is_none());
        assert_eq!(config.required_env_vars(), ["RPC", "DB", "REDIS"]);
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/config.json");
        let config = IndexerConfig::load(&path).unwrap();
        assert_eq!(config.lock.lease_secs, 25);
        assert_eq!(config.metadata.gateways.len(), 1);
    }
}
