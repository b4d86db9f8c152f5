// src/node/peer_pool.rs

//! Per-peer connection cache plus the load/capability metadata used to
//! pick a target for work placement. Mirrors the teacher's lazy-connect-
//! and-cache idiom for outbound data-plane links: a connection is opened
//! on first use and reused until it errors, at which point the next call
//! reconnects. Metadata (load, capabilities, status) is tracked
//! separately from the connection itself and kept fresh by the node's
//! periodic metrics-updater task mirroring `ClusterView`.

use crate::cluster::member::{Capabilities, MemberState, NodeId, now_ms};
use crate::errors::{Result, RidgeError};
use crate::rpc::frame::{Channel, RequestCodec, RequestFrame, ResponseCodec};
use bytes::Bytes;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

struct PeerHandle {
    addr: SocketAddr,
    conn: Mutex<Option<Framed<TcpStream, RequestCodec>>>,
}

/// Load/capability metadata tracked per peer, independent of its
/// connection state.
#[derive(Debug, Clone)]
pub struct PeerMeta {
    pub node_id: NodeId,
    pub addr: SocketAddr,
    pub capabilities: Capabilities,
    pub status: MemberState,
    pub last_seen_ms: u64,
    pub load_score: f64,
    pub active_executions: u64,
}

impl PeerMeta {
    fn bootstrap(node_id: NodeId, addr: SocketAddr, capabilities: Capabilities) -> Self {
        Self {
            node_id,
            addr,
            capabilities,
            status: MemberState::Alive,
            last_seen_ms: now_ms(),
            load_score: 0.0,
            active_executions: 0,
        }
    }
}

pub struct PeerPool {
    handles: DashMap<NodeId, Arc<PeerHandle>>,
    peers: DashMap<NodeId, PeerMeta>,
    round_robin_cursor: AtomicUsize,
}

impl Default for PeerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerPool {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            peers: DashMap::new(),
            round_robin_cursor: AtomicUsize::new(0),
        }
    }

    /// Registers or refreshes a peer's address/capabilities, creating the
    /// metadata entry on first contact.
    pub fn upsert(&self, node_id: NodeId, addr: SocketAddr, capabilities: Capabilities) {
        self.peers
            .entry(node_id)
            .and_modify(|p| {
                p.addr = addr;
                p.capabilities = capabilities;
                p.last_seen_ms = now_ms();
            })
            .or_insert_with(|| PeerMeta::bootstrap(node_id, addr, capabilities));
    }

    pub fn update_status(&self, node_id: NodeId, status: MemberState) {
        if let Some(mut p) = self.peers.get_mut(&node_id) {
            p.status = status;
            p.last_seen_ms = now_ms();
        }
    }

    pub fn update_load(&self, node_id: NodeId, load_score: f64, active_executions: u64) {
        if let Some(mut p) = self.peers.get_mut(&node_id) {
            p.load_score = load_score;
            p.active_executions = active_executions;
        }
    }

    pub fn update_capabilities(&self, node_id: NodeId, capabilities: Capabilities) {
        if let Some(mut p) = self.peers.get_mut(&node_id) {
            p.capabilities = capabilities;
        }
    }

    pub fn list_alive(&self) -> Vec<PeerMeta> {
        self.peers
            .iter()
            .filter(|p| p.value().status != MemberState::Dead)
            .map(|p| p.value().clone())
            .collect()
    }

    pub fn list_by_capability(&self, capability: Capabilities) -> Vec<PeerMeta> {
        self.peers
            .iter()
            .filter(|p| p.value().capabilities.contains(capability))
            .map(|p| p.value().clone())
            .collect()
    }

    /// Minimizes `active_executions + 10 * load_score` among alive peers
    /// advertising `capability`.
    pub fn select_least_loaded(&self, capability: Capabilities) -> Option<PeerMeta> {
        self.list_by_capability(capability)
            .into_iter()
            .filter(|p| p.status != MemberState::Dead)
            .min_by(|a, b| {
                let score_a = a.active_executions as f64 + 10.0 * a.load_score;
                let score_b = b.active_executions as f64 + 10.0 * b.load_score;
                score_a
                    .partial_cmp(&score_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Rotates through alive peers advertising `capability`, skipping
    /// non-alive or non-capable ones.
    pub fn select_round_robin(&self, capability: Capabilities) -> Option<PeerMeta> {
        let candidates: Vec<PeerMeta> = self
            .list_by_capability(capability)
            .into_iter()
            .filter(|p| p.status != MemberState::Dead)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[idx].clone())
    }

    fn handle_for(&self, node_id: NodeId, addr: SocketAddr) -> Arc<PeerHandle> {
        self.handles
            .entry(node_id)
            .and_modify(|h| {
                if h.addr != addr {
                    *h = Arc::new(PeerHandle {
                        addr,
                        conn: Mutex::new(None),
                    });
                }
            })
            .or_insert_with(|| {
                Arc::new(PeerHandle {
                    addr,
                    conn: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Sends one request to `node_id`'s DATA channel, reconnecting if the
    /// cached connection is absent or errors. Returns `(status, payload)`.
    pub async fn call(
        &self,
        node_id: NodeId,
        addr: SocketAddr,
        func_id: u32,
        payload: Bytes,
    ) -> Result<(u8, Bytes)> {
        let handle = self.handle_for(node_id, addr);
        let mut guard = handle.conn.lock().await;

        if guard.is_none() {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true).ok();
            *guard = Some(Framed::new(stream, RequestCodec));
        }

        let send_result = {
            use futures::SinkExt;
            guard
                .as_mut()
                .unwrap()
                .send(RequestFrame {
                    channel: Channel::Data,
                    func_id,
                    payload: payload.clone(),
                })
                .await
        };

        if send_result.is_err() {
            *guard = None;
            return Err(RidgeError::Network(format!("send to node {node_id} failed")));
        }

        // Swap codecs on the same stream to read the length-prefixed response.
        let stream = guard.take().unwrap().into_inner();
        let mut resp_framed = Framed::new(stream, ResponseCodec);
        let response = {
            use futures::StreamExt;
            resp_framed.next().await
        };

        match response {
            Some(Ok(frame)) => {
                *guard = Some(Framed::new(resp_framed.into_inner(), RequestCodec));
                if let Some(mut p) = self.peers.get_mut(&node_id) {
                    p.last_seen_ms = now_ms();
                }
                Ok((frame.status, frame.payload))
            }
            _ => {
                *guard = None;
                Err(RidgeError::Network(format!(
                    "no response from node {node_id}"
                )))
            }
        }
    }

    pub fn drop_peer(&self, node_id: NodeId) {
        self.handles.remove(&node_id);
        self.peers.remove(&node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn select_least_loaded_picks_lowest_combined_score() {
        let pool = PeerPool::new();
        pool.upsert(1, addr(7001), Capabilities::RAFT);
        pool.upsert(2, addr(7002), Capabilities::RAFT);
        pool.update_load(1, 0.5, 10);
        pool.update_load(2, 0.1, 2);

        let picked = pool.select_least_loaded(Capabilities::RAFT).unwrap();
        assert_eq!(picked.node_id, 2);
    }

    #[test]
    fn select_least_loaded_ignores_dead_peers() {
        let pool = PeerPool::new();
        pool.upsert(1, addr(7001), Capabilities::RAFT);
        pool.upsert(2, addr(7002), Capabilities::RAFT);
        pool.update_load(1, 0.0, 0);
        pool.update_status(1, MemberState::Dead);

        let picked = pool.select_least_loaded(Capabilities::RAFT).unwrap();
        assert_eq!(picked.node_id, 2);
    }

    #[test]
    fn select_round_robin_cycles_through_candidates() {
        let pool = PeerPool::new();
        pool.upsert(1, addr(7001), Capabilities::INGRESS);
        pool.upsert(2, addr(7002), Capabilities::INGRESS);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            let picked = pool.select_round_robin(Capabilities::INGRESS).unwrap();
            seen.insert(picked.node_id);
        }
        assert_eq!(seen, std::collections::HashSet::from([1, 2]));
    }

    #[test]
    fn list_by_capability_filters_on_advertised_capability() {
        let pool = PeerPool::new();
        pool.upsert(1, addr(7001), Capabilities::RAFT);
        pool.upsert(2, addr(7002), Capabilities::INGRESS);

        let raft_peers = pool.list_by_capability(Capabilities::RAFT);
        assert_eq!(raft_peers.len(), 1);
        assert_eq!(raft_peers[0].node_id, 1);
    }

    #[test]
    fn drop_peer_removes_both_handle_and_metadata() {
        let pool = PeerPool::new();
        pool.upsert(1, addr(7001), Capabilities::RAFT);
        pool.drop_peer(1);
        assert!(pool.list_alive().is_empty());
    }
}
