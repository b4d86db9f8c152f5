// src/raft/mod.rs

//! Single-group Raft over the DATA channel RPC fabric. Metadata (term,
//! vote, log, indices) is guarded by one `tokio::sync::Mutex`; applying
//! committed entries to the datastore happens on a dedicated task reading
//! off a `watch` channel, the same "mutex for metadata, separate task for
//! the slow part" split the teacher uses for replication/persistence.

pub mod log;

use crate::cluster::member::NodeId;
use crate::cluster::view::ClusterView;
use crate::config::Config;
use crate::errors::{Result, RidgeError};
use crate::node::peer_pool::PeerPool;
use crate::rpc::{FUNC_RAFT_APPEND_ENTRIES, FUNC_RAFT_REQUEST_VOTE, decode_payload, encode_payload};
use async_trait::async_trait;
use log::{RaftCommand, RaftLogEntry};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[async_trait]
pub trait RaftApply: Send + Sync {
    async fn apply(&self, command: &RaftCommand);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: u64,
    pub candidate_id: NodeId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: NodeId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<RaftLogEntry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
    /// Index to retry from on failure — a simple backtrack hint rather than
    /// a full conflicting-term search, adequate at this crate's scale.
    pub conflict_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub term: u64,
    pub leader_id: NodeId,
    pub last_included_index: u64,
    pub last_included_term: u64,
    pub snapshot: Vec<(bytes::Bytes, crate::datastore::Record)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftStatus {
    pub term: u64,
    pub role_is_leader: bool,
    pub leader_id: Option<NodeId>,
    pub commit_index: u64,
    pub last_applied: u64,
}

struct RaftMeta {
    term: u64,
    voted_for: Option<NodeId>,
    log: Vec<RaftLogEntry>,
    commit_index: u64,
    last_applied: u64,
    role: Role,
    leader_id: Option<NodeId>,
    next_index: HashMap<NodeId, u64>,
    match_index: HashMap<NodeId, u64>,
    last_heartbeat: Instant,
}

impl RaftMeta {
    fn last_log_index(&self) -> u64 {
        self.log.last().map(|e| e.index).unwrap_or(0)
    }

    fn last_log_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        self.log
            .iter()
            .find(|e| e.index == index)
            .map(|e| e.term)
    }
}

pub struct RaftNode {
    local_id: NodeId,
    meta: Mutex<RaftMeta>,
    view: Arc<ClusterView>,
    peer_pool: Arc<PeerPool>,
    apply_cb: Arc<dyn RaftApply>,
    commit_tx: watch::Sender<u64>,
    election_timeout_min: Duration,
    election_timeout_max: Duration,
    heartbeat_interval: Duration,
}

impl RaftNode {
    pub fn new(
        local_id: NodeId,
        view: Arc<ClusterView>,
        peer_pool: Arc<PeerPool>,
        apply_cb: Arc<dyn RaftApply>,
        config: &Config,
    ) -> Arc<Self> {
        let (commit_tx, _rx) = watch::channel(0);
        Arc::new(Self {
            local_id,
            meta: Mutex::new(RaftMeta {
                term: 0,
                voted_for: None,
                log: Vec::new(),
                commit_index: 0,
                last_applied: 0,
                role: Role::Follower,
                leader_id: None,
                next_index: HashMap::new(),
                match_index: HashMap::new(),
                last_heartbeat: Instant::now(),
            }),
            view,
            peer_pool,
            apply_cb,
            commit_tx,
            election_timeout_min: Duration::from_millis(config.election_timeout_min_ms),
            election_timeout_max: Duration::from_millis(config.election_timeout_max_ms),
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
        })
    }

    pub async fn status(&self) -> RaftStatus {
        let meta = self.meta.lock().await;
        RaftStatus {
            term: meta.term,
            role_is_leader: meta.role == Role::Leader,
            leader_id: meta.leader_id,
            commit_index: meta.commit_index,
            last_applied: meta.last_applied,
        }
    }

    fn random_election_timeout(&self) -> Duration {
        let min = self.election_timeout_min.as_millis() as u64;
        let max = self.election_timeout_max.as_millis() as u64;
        let millis = rand::thread_rng().gen_range(min..=max.max(min + 1));
        Duration::from_millis(millis)
    }

    /// Proposes a new command if this node is leader. Returns the log
    /// index and term the entry was appended at once committed, or
    /// `NotLeader` with a hint if not.
    pub async fn propose(&self, command: RaftCommand) -> Result<(u64, u64)> {
        let (index, term) = {
            let mut meta = self.meta.lock().await;
            if meta.role != Role::Leader {
                let hint = meta
                    .leader_id
                    .and_then(|id| self.view.get(id))
                    .map(|m| m.data_addr.to_string());
                return Err(RidgeError::NotLeader { leader_hint: hint });
            }
            let index = meta.last_log_index() + 1;
            let term = meta.term;
            meta.log.push(RaftLogEntry {
                term,
                index,
                command,
            });
            (index, term)
        };

        self.replicate_to_followers().await;
        self.wait_for_commit(index).await?;
        Ok((index, term))
    }

    /// Confirms this node is still leader by requiring a majority of
    /// followers to acknowledge a heartbeat issued after this call began,
    /// per the linearizable-read contract: a GET must not serve from
    /// applied state on the strength of a leadership claim that may
    /// already have been superseded by a newer term.
    pub async fn confirm_leadership(&self) -> Result<()> {
        let (term, peers) = {
            let meta = self.meta.lock().await;
            if meta.role != Role::Leader {
                let hint = meta
                    .leader_id
                    .and_then(|id| self.view.get(id))
                    .map(|m| m.data_addr.to_string());
                return Err(RidgeError::NotLeader { leader_hint: hint });
            }
            let peers: Vec<NodeId> = self
                .view
                .alive_members()
                .into_iter()
                .filter(|m| m.node_id != self.local_id)
                .map(|m| m.node_id)
                .collect();
            (meta.term, peers)
        };

        let total_voters = peers.len() + 1;
        let majority = total_voters / 2 + 1;
        let calls = peers.iter().map(|&peer| self.send_append_entries(peer));
        let acked = 1 + futures::future::join_all(calls).await.into_iter().filter(|ok| *ok).count();

        let meta = self.meta.lock().await;
        if meta.role != Role::Leader || meta.term != term {
            let hint = meta
                .leader_id
                .and_then(|id| self.view.get(id))
                .map(|m| m.data_addr.to_string());
            return Err(RidgeError::NotLeader { leader_hint: hint });
        }
        drop(meta);

        if acked >= majority {
            Ok(())
        } else {
            Err(RidgeError::NotLeader { leader_hint: None })
        }
    }

    async fn wait_for_commit(&self, index: u64) -> Result<()> {
        let mut rx = self.commit_tx.subscribe();
        if *rx.borrow() >= index {
            return Ok(());
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while *rx.borrow() < index {
                if rx.changed().await.is_err() {
                    return Err(RidgeError::Network("raft commit channel closed".into()));
                }
            }
            Ok(())
        })
        .await
        .map_err(|_| RidgeError::Timeout)?
    }

    async fn replicate_to_followers(&self) {
        let peers: Vec<NodeId> = self
            .view
            .alive_members()
            .into_iter()
            .filter(|m| m.node_id != self.local_id)
            .map(|m| m.node_id)
            .collect();
        for peer in peers {
            self.send_append_entries(peer).await;
        }
    }

    /// Sends one AppendEntries RPC to `peer`. Returns whether the peer
    /// acknowledged this leader's current term — used both for ordinary
    /// replication and as the heartbeat probe `confirm_leadership` counts.
    async fn send_append_entries(&self, peer: NodeId) -> bool {
        let Some(member) = self.view.get(peer) else {
            return false;
        };
        let request = {
            let mut meta = self.meta.lock().await;
            if meta.role != Role::Leader {
                return false;
            }
            let next_index = *meta.next_index.entry(peer).or_insert(meta.last_log_index() + 1);
            let prev_log_index = next_index.saturating_sub(1);
            let prev_log_term = meta.term_at(prev_log_index).unwrap_or(0);
            let entries: Vec<RaftLogEntry> = meta
                .log
                .iter()
                .filter(|e| e.index >= next_index)
                .cloned()
                .collect();
            AppendEntriesRequest {
                term: meta.term,
                leader_id: self.local_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: meta.commit_index,
            }
        };

        let payload = encode_payload(&request);
        let result = self
            .peer_pool
            .call(peer, member.data_addr, FUNC_RAFT_APPEND_ENTRIES, payload)
            .await;

        let Ok((_status, body)) = result else {
            return false;
        };
        let Ok(response): Result<AppendEntriesResponse> = decode_payload(&body) else {
            return false;
        };

        let mut meta = self.meta.lock().await;
        if response.term > meta.term {
            self.step_down(&mut meta, response.term);
            return false;
        }
        if meta.role != Role::Leader {
            return false;
        }
        if response.success {
            let sent_last = request.prev_log_index + request.entries.len() as u64;
            meta.match_index.insert(peer, sent_last);
            meta.next_index.insert(peer, sent_last + 1);
            self.advance_commit_index(&mut meta);
            true
        } else {
            let retry_from = response.conflict_index.max(1);
            meta.next_index.insert(peer, retry_from);
            false
        }
    }

    /// Majority + current-term-entry commit rule: a log index can only be
    /// marked committed once a majority of `match_index` values reach it
    /// AND the entry at that index was appended during the leader's own
    /// term — prevents committing a stale-term entry via replication alone.
    fn advance_commit_index(&self, meta: &mut RaftMeta) {
        let mut indices: Vec<u64> = meta.match_index.values().copied().collect();
        indices.push(meta.last_log_index());
        indices.sort_unstable();
        let majority_index = indices[indices.len() / 2];

        if majority_index > meta.commit_index
            && meta.term_at(majority_index) == Some(meta.term)
        {
            meta.commit_index = majority_index;
            let _ = self.commit_tx.send(meta.commit_index);
        }
    }

    fn step_down(&self, meta: &mut RaftMeta, new_term: u64) {
        meta.term = new_term;
        meta.role = Role::Follower;
        meta.voted_for = None;
        meta.leader_id = None;
    }

    pub async fn handle_request_vote(&self, req: RequestVoteRequest) -> RequestVoteResponse {
        let mut meta = self.meta.lock().await;
        if req.term > meta.term {
            self.step_down(&mut meta, req.term);
        }
        if req.term < meta.term {
            return RequestVoteResponse {
                term: meta.term,
                vote_granted: false,
            };
        }

        let log_ok = req.last_log_term > meta.last_log_term()
            || (req.last_log_term == meta.last_log_term()
                && req.last_log_index >= meta.last_log_index());
        let can_vote = meta.voted_for.is_none() || meta.voted_for == Some(req.candidate_id);

        if can_vote && log_ok {
            meta.voted_for = Some(req.candidate_id);
            meta.last_heartbeat = Instant::now();
            RequestVoteResponse {
                term: meta.term,
                vote_granted: true,
            }
        } else {
            RequestVoteResponse {
                term: meta.term,
                vote_granted: false,
            }
        }
    }

    pub async fn handle_append_entries(
        &self,
        req: AppendEntriesRequest,
    ) -> AppendEntriesResponse {
        let mut meta = self.meta.lock().await;
        if req.term < meta.term {
            return AppendEntriesResponse {
                term: meta.term,
                success: false,
                conflict_index: meta.last_log_index() + 1,
            };
        }
        if req.term > meta.term || meta.role != Role::Follower {
            self.step_down(&mut meta, req.term);
        }
        meta.leader_id = Some(req.leader_id);
        meta.last_heartbeat = Instant::now();

        if req.prev_log_index > 0 && meta.term_at(req.prev_log_index) != Some(req.prev_log_term) {
            return AppendEntriesResponse {
                term: meta.term,
                success: false,
                conflict_index: req.prev_log_index.min(meta.last_log_index() + 1),
            };
        }

        meta.log.retain(|e| e.index <= req.prev_log_index);
        meta.log.extend(req.entries);

        if req.leader_commit > meta.commit_index {
            meta.commit_index = req.leader_commit.min(meta.last_log_index());
            let commit_index = meta.commit_index;
            let _ = self.commit_tx.send(commit_index);
        }

        AppendEntriesResponse {
            term: meta.term,
            success: true,
            conflict_index: 0,
        }
    }

    pub async fn handle_install_snapshot(
        &self,
        req: InstallSnapshotRequest,
        datastore: &crate::datastore::Datastore,
    ) -> InstallSnapshotResponse {
        let mut meta = self.meta.lock().await;
        if req.term < meta.term {
            return InstallSnapshotResponse { term: meta.term };
        }
        if req.term > meta.term {
            self.step_down(&mut meta, req.term);
        }
        meta.leader_id = Some(req.leader_id);
        meta.last_heartbeat = Instant::now();

        for (key, record) in req.snapshot {
            let _ = datastore.apply(key, record);
        }
        meta.log.retain(|e| e.index > req.last_included_index);
        meta.commit_index = meta.commit_index.max(req.last_included_index);
        meta.last_applied = meta.last_applied.max(req.last_included_index);
        InstallSnapshotResponse { term: meta.term }
    }

    async fn start_election(&self) {
        let (term, request) = {
            let mut meta = self.meta.lock().await;
            meta.term += 1;
            meta.role = Role::Candidate;
            meta.voted_for = Some(self.local_id);
            meta.last_heartbeat = Instant::now();
            (
                meta.term,
                RequestVoteRequest {
                    term: meta.term,
                    candidate_id: self.local_id,
                    last_log_index: meta.last_log_index(),
                    last_log_term: meta.last_log_term(),
                },
            )
        };

        let peers: Vec<_> = self
            .view
            .alive_members()
            .into_iter()
            .filter(|m| m.node_id != self.local_id)
            .collect();
        let total_voters = peers.len() + 1;
        let majority = total_voters / 2 + 1;
        let mut votes = 1usize; // vote for self

        let payload = encode_payload(&request);
        let mut calls = Vec::new();
        for peer in &peers {
            calls.push(self.peer_pool.call(
                peer.node_id,
                peer.data_addr,
                FUNC_RAFT_REQUEST_VOTE,
                payload.clone(),
            ));
        }
        let results = futures::future::join_all(calls).await;

        let mut meta = self.meta.lock().await;
        if meta.role != Role::Candidate || meta.term != term {
            return; // stepped down or a newer election already started
        }

        for result in results.into_iter().flatten() {
            let (_status, body) = result;
            if let Ok(response) = decode_payload::<RequestVoteResponse>(&body) {
                if response.term > meta.term {
                    self.step_down(&mut meta, response.term);
                    return;
                }
                if response.vote_granted {
                    votes += 1;
                }
            }
        }

        if votes >= majority {
            info!(target: "ridgedb::raft", term, votes, majority, "won election");
            meta.role = Role::Leader;
            meta.leader_id = Some(self.local_id);
            let next = meta.last_log_index() + 1;
            meta.next_index.clear();
            meta.match_index.clear();
            for peer in &peers {
                meta.next_index.insert(peer.node_id, next);
            }
            let noop_index = next;
            meta.log.push(RaftLogEntry {
                term: meta.term,
                index: noop_index,
                command: RaftCommand::Noop,
            });
        }
    }

    async fn apply_committed(&self) {
        let entries_to_apply: Vec<RaftLogEntry> = {
            let mut meta = self.meta.lock().await;
            let from = meta.last_applied + 1;
            let to = meta.commit_index;
            if from > to {
                return;
            }
            let entries: Vec<RaftLogEntry> = meta
                .log
                .iter()
                .filter(|e| e.index >= from && e.index <= to)
                .cloned()
                .collect();
            meta.last_applied = to;
            entries
        };
        for entry in entries_to_apply {
            self.apply_cb.apply(&entry.command).await;
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut commit_rx = self.commit_tx.subscribe();
        let mut election_deadline = Instant::now() + self.random_election_timeout();
        let mut heartbeat_tick = tokio::time::interval(self.heartbeat_interval);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!(target: "ridgedb::raft", "raft node shutting down");
                    return;
                }
                _ = tokio::time::sleep_until(election_deadline) => {
                    let meta_snapshot = {
                        let meta = self.meta.lock().await;
                        (meta.role, meta.last_heartbeat)
                    };
                    if meta_snapshot.0 == Role::Leader {
                        election_deadline = Instant::now() + self.random_election_timeout();
                    } else if meta_snapshot.1.elapsed() < self.election_timeout_min {
                        // A heartbeat landed (via the RPC handler, on another
                        // task) since this deadline was scheduled.
                        election_deadline = meta_snapshot.1 + self.random_election_timeout();
                    } else {
                        self.start_election().await;
                        election_deadline = Instant::now() + self.random_election_timeout();
                    }
                }
                _ = heartbeat_tick.tick() => {
                    let is_leader = self.meta.lock().await.role == Role::Leader;
                    if is_leader {
                        self.replicate_to_followers().await;
                    }
                }
                _ = commit_rx.changed() => {
                    self.apply_committed().await;
                }
            }
        }
    }
}
