//! Typed view of the daemon's config sections. Every field has a compiled-in
//! default so an empty (or absent) config file boots a working daemon.

use anyhow::{Context, Result};
use lvd_pricing::FeeSchedule;
use serde::{Deserialize, Serialize};

use crate::{load_layered_yaml, LoadedConfig};

/// `LVD_DAEMON_ADDR` overrides `bind_addr` from any layer.
pub const ENV_DAEMON_ADDR: &str = "LVD_DAEMON_ADDR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub bind_addr: String,
    pub store: StoreSettings,
    pub feed: FeedSettings,
    pub pricing: FeeSchedule,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8790".to_string(),
            store: StoreSettings::default(),
            feed: FeedSettings::default(),
            pricing: FeeSchedule::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub max_connections: u32,
    /// Budget for a single store operation. Writes that exceed it surface
    /// `StoreError::Timeout` instead of blocking a request slot forever.
    pub command_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            command_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    /// Broadcast ring size. Slow subscribers past this many undelivered
    /// signals lag and get a coalesced fresh signal instead.
    pub capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Load the daemon config from layered YAML paths, apply env overrides, and
/// hand back both the typed view and the hashed raw load for boot logging.
pub fn load_daemon_config(paths: &[&str]) -> Result<(DaemonConfig, LoadedConfig)> {
    let loaded = load_layered_yaml(paths)?;
    let mut cfg: DaemonConfig = serde_json::from_value(loaded.config_json.clone())
        .context("config does not match the daemon schema")?;
    if let Ok(addr) = std::env::var(ENV_DAEMON_ADDR) {
        if !addr.trim().is_empty() {
            cfg.bind_addr = addr;
        }
    }
    Ok((cfg, loaded))
}
