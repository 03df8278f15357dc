use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::url_utils::sanitize_url;

/// Collector configuration, loaded from a JSON file. Every field has a
/// default so a partial config is acceptable; only an unparsable file or an
/// out-of-range value is fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_name: String,
    pub listen: String,
    /// Seed storage nodes, `host:port:family` each.
    pub nodes: Vec<String>,
    /// Refresh cycle period, seconds.
    pub refresh_interval: u64,
    /// Per-node poll timeout, milliseconds.
    pub node_poll_timeout: u64,
    /// Free-space fraction reserved for operations, within [0, 1).
    pub reserved_space: f64,
    /// Seconds without fresh telemetry before a backend counts as stalled.
    pub node_backend_stat_stale_timeout: u64,
    /// A group with more than one backend is BROKEN when set.
    pub forbidden_dht_groups: bool,
    /// Couples with unequal per-group total space are BROKEN when set.
    pub forbidden_unmatched_group_total_space: bool,
    /// DC cache reload cadence, seconds.
    pub infrastructure_dc_cache_update_period: u64,
    /// Per-entry DC cache TTL, seconds.
    pub infrastructure_dc_cache_valid_time: u64,
    /// External DC lookup timeout, milliseconds.
    pub inventory_worker_timeout: u64,
    /// Base URL of the external DC lookup service; empty disables lookups.
    pub inventory_url: String,
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Record store location; empty disables the persistent DC cache.
    pub url: String,
    pub inventory: InventoryConfig,
    pub options: MetadataOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub db: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataOptions {
    #[serde(rename = "connectTimeoutMS")]
    pub connect_timeout_ms: u64,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "blobmon".to_string(),
            listen: "0.0.0.0:8585".to_string(),
            nodes: Vec::new(),
            refresh_interval: 60,
            node_poll_timeout: 5000,
            reserved_space: 0.0,
            node_backend_stat_stale_timeout: 120,
            forbidden_dht_groups: false,
            forbidden_unmatched_group_total_space: false,
            infrastructure_dc_cache_update_period: 150,
            infrastructure_dc_cache_valid_time: 604_800,
            inventory_worker_timeout: 5000,
            inventory_url: "http://127.0.0.1:10053".to_string(),
            metadata: MetadataConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..1.0).contains(&self.reserved_space) {
            bail!(
                "reserved_space must be within [0, 1), got {}",
                self.reserved_space
            );
        }
        if !self.inventory_url.is_empty() {
            sanitize_url(&self.inventory_url)
                .context("invalid inventory_url")?;
        }
        Ok(())
    }

    /// The external lookup service is named after the application.
    pub fn inventory_service_name(&self) -> String {
        format!("{}-inventory", self.app_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.refresh_interval, 60);
        assert_eq!(config.infrastructure_dc_cache_valid_time, 604_800);
        assert!(!config.forbidden_dht_groups);
        assert_eq!(config.metadata.options.connect_timeout_ms, 5000);
        assert_eq!(config.inventory_service_name(), "blobmon-inventory");
    }

    #[test]
    fn test_reserved_space_range() {
        let mut config = Config::default();
        config.reserved_space = 1.0;
        assert!(config.validate().is_err());
        config.reserved_space = 0.95;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_connect_timeout_wire_name() {
        let config: Config = serde_json::from_str(
            r#"{"metadata": {"url": "/var/lib/blobmon", "inventory": {"db": "inventory"},
                "options": {"connectTimeoutMS": 750}}}"#,
        )
        .unwrap();
        assert_eq!(config.metadata.options.connect_timeout_ms, 750);
        assert_eq!(config.metadata.inventory.db, "inventory");
    }
}
