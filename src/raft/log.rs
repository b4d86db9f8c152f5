// src/raft/log.rs

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RaftCommand {
    Set { key: Bytes, value: Bytes },
    Unset { key: Bytes },
    /// A committed no-op appended by a newly elected leader so it can
    /// establish commit_index over an entry from its own term before
    /// serving reads, per the Raft "current-term entry" commit rule.
    Noop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaftLogEntry {
    pub term: u64,
    pub index: u64,
    pub command: RaftCommand,
}
