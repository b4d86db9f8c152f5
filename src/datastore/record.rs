// src/datastore/record.rs

use crate::cluster::member::{NodeId, now_ms};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single stored value plus the version/timestamp/tombstone metadata
/// needed for last-writer-wins merge, delta sync, and delete propagation
/// across replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub value: Bytes,
    pub version: u64,
    pub owner_node: NodeId,
    pub tombstone: bool,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Record {
    pub fn new(value: Bytes, version: u64, owner_node: NodeId) -> Self {
        let now = now_ms();
        Self {
            value,
            version,
            owner_node,
            tombstone: false,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    /// A deleted record: empty value, `tombstone` set, retained so the
    /// delete propagates via SYNC/gossip instead of a peer's stale copy
    /// silently resurrecting the key.
    pub fn tombstoned(version: u64, owner_node: NodeId) -> Self {
        let now = now_ms();
        Self {
            value: Bytes::new(),
            version,
            owner_node,
            tombstone: true,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    /// Last-writer-wins: higher version wins; ties broken by owner_node so
    /// merge is deterministic regardless of arrival order. Tombstones
    /// participate in this ordering identically to live records — a
    /// delete is just another write for ordering purposes.
    pub fn should_replace(&self, incoming: &Record) -> bool {
        match incoming.version.cmp(&self.version) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => incoming.owner_node > self.owner_node,
            std::cmp::Ordering::Less => false,
        }
    }

    pub fn memory_usage(&self) -> usize {
        self.value.len() + std::mem::size_of::<u64>() * 3 + std::mem::size_of::<NodeId>() + 1
    }
}
