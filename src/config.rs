// src/config.rs

//! Loads the `Config` value object from a TOML file. `Config` itself is an
//! external collaborator value object; this loader is deliberately thin.

use crate::errors::{Result, RidgeError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeType {
    Router,
    Worker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    pub gossip_addr: SocketAddr,
    pub data_addr: SocketAddr,
    pub ingress_addr: Option<SocketAddr>,
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub cluster_name: String,
    pub node_id: u16,
    pub node_type: NodeType,
    pub ports: PortsConfig,
    #[serde(default)]
    pub routers: Vec<SocketAddr>,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enables single-group Raft replication alongside gossip/LWW. Off by
    /// default: spec.md treats Raft as an optional mode.
    #[serde(default)]
    pub raft_enabled: bool,

    #[serde(default = "default_gossip_interval_ms")]
    pub gossip_interval_ms: u64,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_suspect_timeout_ms")]
    pub suspect_timeout_ms: u64,
    #[serde(default = "default_dead_timeout_ms")]
    pub dead_timeout_ms: u64,

    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,
    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_datastore_capacity")]
    pub datastore_capacity: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_gossip_interval_ms() -> u64 {
    200
}
fn default_probe_interval_ms() -> u64 {
    1_000
}
fn default_suspect_timeout_ms() -> u64 {
    5_000
}
fn default_dead_timeout_ms() -> u64 {
    15_000
}
fn default_election_timeout_min_ms() -> u64 {
    150
}
fn default_election_timeout_max_ms() -> u64 {
    300
}
fn default_heartbeat_interval_ms() -> u64 {
    50
}
fn default_datastore_capacity() -> usize {
    1_000_000
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| RidgeError::Config(format!("reading {path}: {e}")))?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(RidgeError::Config("cluster_name must not be empty".into()));
        }
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(RidgeError::Config(
                "election_timeout_min_ms must be < election_timeout_max_ms".into(),
            ));
        }
        if self.node_type == NodeType::Worker && self.ports.ingress_addr.is_none() {
            // Workers may still expose ingress; routers never need it. Not an error,
            // just a configuration choice left to the operator.
        }
        Ok(())
    }
}
