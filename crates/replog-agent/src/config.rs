//! # config
//!
//! why: collect the per-node knobs in one deserializable place
//! relations: consumed by agent.rs and timer.rs
//! what: AgentConfig and TimingConfig structs with protocol defaults

use replog_core::PeerId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// protocol timing (in milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// lower bound of the randomized election timeout (default: 150)
    pub election_timeout_min: u64,
    /// upper bound of the randomized election timeout (default: 300)
    pub election_timeout_max: u64,
    /// leader heartbeat interval (default: 50)
    pub heartbeat_interval: u64,
    /// timer polling granularity of the dispatch loop (default: 10)
    pub tick_interval: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            tick_interval: 10,
        }
    }
}

impl TimingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }
}

/// per-node agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// address of the discovery service this node registers with at startup
    pub discovery: PeerId,
    /// protocol timing knobs
    #[serde(default)]
    pub timing: TimingConfig,
}

impl AgentConfig {
    pub fn new(discovery: PeerId) -> Self {
        Self {
            discovery,
            timing: TimingConfig::default(),
        }
    }
}
