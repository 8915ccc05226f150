//! # error
//!
//! why: give the agent a typed error surface instead of bare io errors
//! relations: WireError raised by wire.rs, AgentError by agent.rs
//! what: WireError and AgentError enums, crate Result alias

use thiserror::Error;

/// codec-level failures while parsing a frame
#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame ended inside a value")]
    UnexpectedEof,

    #[error("varint wider than 64 bits")]
    VarintOverflow,

    #[error("unsupported wire type {wire_type} for tag {tag}")]
    UnsupportedWireType { tag: u32, wire_type: u8 },

    #[error("frame carries no sender identity")]
    MissingSender,

    #[error("frame carries no message body")]
    MissingBody,

    #[error("invalid utf-8 in string field: {0}")]
    InvalidString(#[from] std::string::FromUtf8Error),
}

/// runtime failures of the node agent
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("wire format error: {0}")]
    Wire(#[from] WireError),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
