//! # message
//!
//! why: define the logical messages nodes, discovery, and clients exchange
//! relations: produced and consumed by node.rs, mapped to the wire by replog-agent
//! what: Message enum, Envelope addressing wrapper

use crate::{LogEntry, PeerId};
use serde::{Deserialize, Serialize};

/// all messages a node can send or receive
///
/// identities that travel out-of-band on the wire (the leader, the
/// candidate, the replying peer) are explicit fields here; the codec maps
/// them to and from the frame sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// announce this node to the discovery service
    RegisterNode,
    /// membership update from discovery; the list includes self
    ActiveNodes { nodes: Vec<PeerId> },
    /// leader-to-follower replication; empty entries double as a heartbeat
    AppendEntries {
        term: u64,
        leader: PeerId,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    },
    /// follower's answer to AppendEntries
    AppendEntriesResult { term: u64, peer: PeerId, success: bool },
    /// candidate soliciting a vote
    RequestVote {
        term: u64,
        candidate: PeerId,
        last_log_index: u64,
        last_log_term: u64,
    },
    /// a peer's answer to RequestVote
    RequestVoteResult { term: u64, vote_granted: bool },
    /// client command submission; the payload is opaque to the core
    Command { command: Vec<u8> },
    /// answer to a client command; redirect names the leader to retry against
    CommandResult {
        success: bool,
        redirect: Option<PeerId>,
    },
    /// liveness probe, orthogonal to consensus
    Ping,
    /// liveness probe answer
    Pong,
}

/// a message addressed to a destination
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub to: PeerId,
    pub message: Message,
}

impl Envelope {
    pub fn new(to: PeerId, message: Message) -> Self {
        Self { to, message }
    }
}
