// src/cluster/member.rs

use crate::config::NodeType;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

pub type NodeId = u16;

bitflags::bitflags! {
    /// Capability flags a member advertises in gossip. Only ingress-capable
    /// nodes register an INGRESS channel handler, per spec's capability gate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Capabilities: u8 {
        const INGRESS = 0b0000_0001;
        const RAFT    = 0b0000_0010;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberState {
    Alive,
    Suspect,
    Dead,
}

impl MemberState {
    /// SWIM ordering used to decide whether an incoming state at the same
    /// incarnation should override the locally stored one: Dead beats
    /// Suspect beats Alive, so a node cannot flap back to Alive without
    /// bumping its incarnation.
    fn rank(self) -> u8 {
        match self {
            MemberState::Alive => 0,
            MemberState::Suspect => 1,
            MemberState::Dead => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub node_id: NodeId,
    pub node_type: NodeType,
    pub gossip_addr: SocketAddr,
    pub data_addr: SocketAddr,
    pub ingress_addr: Option<SocketAddr>,
    pub capabilities: Capabilities,
    pub state: MemberState,
    pub incarnation: u64,
    /// Epoch-millis timestamp of the last time this record was refreshed,
    /// either locally (probe round-trip) or via gossip merge.
    pub last_seen_ms: u64,
}

impl ClusterMember {
    pub fn bootstrap(
        node_id: NodeId,
        node_type: NodeType,
        gossip_addr: SocketAddr,
        data_addr: SocketAddr,
        ingress_addr: Option<SocketAddr>,
        raft_enabled: bool,
    ) -> Self {
        let mut capabilities = Capabilities::empty();
        if ingress_addr.is_some() {
            capabilities |= Capabilities::INGRESS;
        }
        if raft_enabled {
            capabilities |= Capabilities::RAFT;
        }
        Self {
            node_id,
            node_type,
            gossip_addr,
            data_addr,
            ingress_addr,
            capabilities,
            state: MemberState::Alive,
            incarnation: 0,
            last_seen_ms: now_ms(),
        }
    }

    /// Whether `incoming` should replace `self` in the cluster view, per the
    /// SWIM incarnation/state precedence rule.
    pub fn should_supersede(&self, incoming: &ClusterMember) -> bool {
        match incoming.incarnation.cmp(&self.incarnation) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => incoming.state.rank() > self.state.rank(),
            std::cmp::Ordering::Less => false,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen_ms = now_ms();
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
