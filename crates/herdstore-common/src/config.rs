//! Configuration types for herdstore
//!
//! This module defines the configuration structures loaded from TOML by
//! the daemon and merged with command-line flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for a herdstore daemon
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration
    #[serde(default)]
    pub node: NodeConfig,
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node identity and cluster-view configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name (human-readable identifier)
    #[serde(default = "default_node_name")]
    pub name: String,
    /// Cluster node count used for dynamic thread roofs
    #[serde(default = "default_nr_nodes")]
    pub nr_nodes: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            nr_nodes: default_nr_nodes(),
        }
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Enable the multi-disk placement layer
    #[serde(default = "default_multidisk")]
    pub multidisk: bool,
    /// Legacy single-disk object path, used when multi-disk is disabled
    #[serde(default = "default_obj_path")]
    pub obj_path: PathBuf,
    /// Storage paths managed by the placement layer
    #[serde(default)]
    pub disks: Vec<PathBuf>,
    /// Name of the dedicated disk-recovery work queue
    #[serde(default = "default_recovery_queue")]
    pub recovery_queue: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            multidisk: default_multidisk(),
            obj_path: default_obj_path(),
            disks: Vec::new(),
            recovery_queue: default_recovery_queue(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level filter
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_node_name() -> String {
    "herdstore-node".to_string()
}

fn default_nr_nodes() -> usize {
    1
}

fn default_multidisk() -> bool {
    true
}

fn default_obj_path() -> PathBuf {
    PathBuf::from("/var/lib/herdstore/obj")
}

fn default_recovery_queue() -> String {
    "md_recover".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.node.name, "herdstore-node");
        assert_eq!(config.node.nr_nodes, 1);
        assert!(config.storage.multidisk);
        assert!(config.storage.disks.is_empty());
        assert_eq!(config.storage.recovery_queue, "md_recover");
    }
}
