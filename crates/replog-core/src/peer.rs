//! # peer
//!
//! why: identify cluster members and track per-peer replication progress
//! relations: used by node.rs for the peer table, carried by value in message.rs types
//! what: PeerId value type, ReplicationState cursors

use serde::{Deserialize, Serialize};
use std::fmt;

/// globally unique identity of a cluster member
///
/// combines a transport address with a logical id so two nodes behind the
/// same address stay distinguishable. used as a map key and carried by
/// value inside messages; never a reference back into the peer table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId {
    /// transport address the peer is reachable at
    pub address: String,
    /// logical id, unique within the address
    pub id: String,
}

impl PeerId {
    pub fn new(address: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.id)
    }
}

/// replication cursors a leader keeps for one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationState {
    /// index of the next log entry to send to this peer (1-indexed)
    pub next_index: u64,
    /// index of the highest log entry known to be replicated on this peer
    pub match_index: u64,
}

impl ReplicationState {
    /// fresh cursors for a peer we have no replication knowledge about
    pub fn reset(last_log_index: u64) -> Self {
        Self {
            next_index: last_log_index + 1,
            match_index: 0,
        }
    }
}
