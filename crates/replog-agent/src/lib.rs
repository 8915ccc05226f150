//! # replog-agent
//!
//! why: turn the pure consensus core into a running node with timers and a mailbox
//! relations: drives replog-core, persists through replog-storage
//! what: NodeAgent dispatch loop, Transport trait, wire codec, configuration

pub mod agent;
pub mod config;
pub mod error;
mod timer;
pub mod wire;

pub use agent::{Inbound, NodeAgent, Transport};
pub use config::{AgentConfig, TimingConfig};
pub use error::{AgentError, WireError};
pub use wire::{Frame, WireCodec};
