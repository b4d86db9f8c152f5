// src/datastore/store.rs

//! A fixed-capacity, sharded in-memory datastore. Sharding mirrors the
//! teacher's `Db`/`DbShard` split: each shard is independently lockable so
//! concurrent operations on unrelated keys never contend.

use crate::cluster::member::{NodeId, now_ms};
use crate::datastore::record::Record;
use crate::errors::{Result, RidgeError};
use crate::metrics::DATASTORE_KEYS;
use bytes::Bytes;
use dashmap::DashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const NUM_SHARDS: usize = 16;
/// Longest accepted key, in bytes.
pub const MAX_KEY_LEN: usize = 256;
/// Largest accepted value, in bytes.
pub const MAX_VALUE_BYTES: usize = 1024 * 1024;

struct Shard {
    entries: DashMap<Bytes, Record>,
}

pub struct Datastore {
    shards: Vec<Shard>,
    capacity: usize,
    /// Occupied slots, tombstones included: a tombstone holds its slot
    /// until `purge_tombstones` retires it.
    slot_count: AtomicUsize,
}

impl Datastore {
    pub fn new(capacity: usize) -> Self {
        let shards = (0..NUM_SHARDS)
            .map(|_| Shard {
                entries: DashMap::new(),
            })
            .collect();
        Self {
            shards,
            capacity,
            slot_count: AtomicUsize::new(0),
        }
    }

    fn shard_index(key: &Bytes) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    fn shard(&self, key: &Bytes) -> &Shard {
        &self.shards[Self::shard_index(key)]
    }

    /// Applies an incoming record with last-writer-wins semantics. Used both
    /// for direct client SETs (caller picks `version`/`owner_node`) and for
    /// SYNC/Raft-apply merges. Returns `true` if the record was applied.
    pub fn apply(&self, key: Bytes, incoming: Record) -> Result<bool> {
        validate_key(&key)?;
        if incoming.value.len() > MAX_VALUE_BYTES {
            return Err(RidgeError::Invalid(format!(
                "value exceeds {MAX_VALUE_BYTES} byte limit"
            )));
        }
        let shard = self.shard(&key);
        match shard.entries.entry(key) {
            dashmap::mapref::entry::Entry::Vacant(v) => {
                if self.slot_count.load(Ordering::Relaxed) >= self.capacity {
                    return Err(RidgeError::Full);
                }
                v.insert(incoming);
                self.slot_count.fetch_add(1, Ordering::Relaxed);
                DATASTORE_KEYS.set(self.len() as i64);
                Ok(true)
            }
            dashmap::mapref::entry::Entry::Occupied(mut o) => {
                if o.get().should_replace(&incoming) {
                    o.insert(incoming);
                    DATASTORE_KEYS.set(self.len() as i64);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Live (non-tombstone) value for `key`; a tombstoned or absent key
    /// reads identically as "not found".
    pub fn get(&self, key: &Bytes) -> Option<Record> {
        self.shard(key)
            .entries
            .get(key)
            .map(|r| r.value().clone())
            .filter(|r| !r.tombstone)
    }

    /// Marks `key` deleted by writing a tombstone at a bumped version,
    /// instead of removing the slot outright: a hard delete would let a
    /// peer's later SYNC of its still-live copy silently recreate the key.
    /// Returns `None` if the key was already absent or already a
    /// tombstone — UNSET is idempotent at the RPC boundary.
    pub fn unset(&self, key: &Bytes, owner_node: NodeId) -> Result<Option<Record>> {
        validate_key(key)?;
        let shard = self.shard(key);
        let Some(mut entry) = shard.entries.get_mut(key) else {
            return Ok(None);
        };
        if entry.tombstone {
            return Ok(None);
        }
        let version = entry.version.max(now_ms()) + 1;
        let tombstone = Record::tombstoned(version, owner_node);
        *entry = tombstone.clone();
        drop(entry);
        DATASTORE_KEYS.set(self.len() as i64);
        Ok(Some(tombstone))
    }

    /// Live keys only — a tombstoned key is not "listed".
    pub fn list_keys(&self) -> Vec<Bytes> {
        self.shards
            .iter()
            .flat_map(|s| {
                s.entries
                    .iter()
                    .filter(|r| !r.value().tombstone)
                    .map(|r| r.key().clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Every record, tombstones included — the wire content peers need for
    /// anti-entropy SYNC and Raft snapshot transfer.
    pub fn snapshot(&self) -> Vec<(Bytes, Record)> {
        self.shards
            .iter()
            .flat_map(|s| {
                s.entries
                    .iter()
                    .map(|r| (r.key().clone(), r.value().clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Records (tombstones included) updated after `since_ms`, for delta
    /// sync: a peer catching up need not re-fetch the whole keyspace.
    pub fn modified_since(&self, since_ms: u64) -> Vec<(Bytes, Record)> {
        self.shards
            .iter()
            .flat_map(|s| {
                s.entries
                    .iter()
                    .filter(|r| r.value().updated_at_ms > since_ms)
                    .map(|r| (r.key().clone(), r.value().clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Drops tombstones last touched more than `retention_ms` ago, freeing
    /// their slot. Never removes a live record. Returns the number purged.
    pub fn purge_tombstones(&self, retention_ms: u64) -> usize {
        let now = now_ms();
        let mut purged = 0usize;
        for shard in &self.shards {
            shard.entries.retain(|_, record| {
                let expired =
                    record.tombstone && now.saturating_sub(record.updated_at_ms) >= retention_ms;
                if expired {
                    purged += 1;
                }
                !expired
            });
        }
        if purged > 0 {
            self.slot_count.fetch_sub(purged, Ordering::Relaxed);
            DATASTORE_KEYS.set(self.len() as i64);
        }
        purged
    }

    /// Count of live (non-tombstone) keys — what `DATASTORE_KEYS` reports.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.entries.iter().filter(|r| !r.value().tombstone).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Non-empty, length <= `MAX_KEY_LEN`, characters drawn from
/// alphanumerics plus `_ - . : /`.
fn validate_key(key: &Bytes) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(RidgeError::Invalid(format!(
            "key length must be 1..={MAX_KEY_LEN} bytes"
        )));
    }
    if !key.iter().all(|&b| is_valid_key_byte(b)) {
        return Err(RidgeError::Invalid(
            "key must contain only alphanumerics, '_', '-', '.', ':', '/'".into(),
        ));
    }
    Ok(())
}

fn is_valid_key_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':' | b'/')
}
