//! # replog-core
//!
//! why: implement the per-node consensus state machine for a replicated command log
//! relations: driven by replog-agent's dispatch loop, persisted via replog-storage
//! what: node state machine, election logic, log replication, message types

pub mod log;
pub mod message;
pub mod node;
pub mod peer;

pub use log::LogEntry;
pub use message::{Envelope, Message};
pub use node::{CommandHandler, NodeState, RaftNode, Transition};
pub use peer::{PeerId, ReplicationState};
