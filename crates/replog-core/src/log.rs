//! # log
//!
//! why: represent the ordered command log that the cluster replicates
//! relations: owned by node.rs, shipped inside message.rs AppendEntries, persisted via replog-storage
//! what: LogEntry struct

use serde::{Deserialize, Serialize};

/// a single entry in the replicated log
///
/// entries are addressed by their 1-indexed position; index 0 means
/// "no entry". an entry is immutable once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// the term of the leader that appended this entry
    pub term: u64,
    /// opaque command payload for the application state machine
    pub command: Vec<u8>,
}

impl LogEntry {
    /// create a new log entry
    pub fn new(term: u64, command: Vec<u8>) -> Self {
        Self { term, command }
    }
}
