// src/cluster/gossip.rs

//! SWIM-style membership gossip over UDP: periodic anti-entropy push of a
//! random member subset, direct failure-detection probes, and
//! suspect/dead timeout sweeps. Structured like the teacher's gossip task:
//! one task owns the socket, a `tokio::select!` loop ticks timers and
//! drains a command channel fed by the RPC/handler layer.

use crate::cluster::member::{ClusterMember, MemberState, NodeId, now_ms};
use crate::cluster::view::ClusterView;
use crate::config::Config;
use crate::metrics::GOSSIP_RTT_MS;
use bincode::{Decode, Encode};
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Number of peers a gossip tick disseminates membership updates to.
const GOSSIP_FANOUT: usize = 3;
/// Maximum UDP datagram payload gossip will encode into; keeps datagrams
/// well under typical path MTU even with a few hundred members.
const MAX_DATAGRAM_BYTES: usize = 60 * 1024;

#[derive(Debug, Clone, Encode, Decode)]
pub enum GossipWireMessage {
    /// Anti-entropy push: a batch of member records, each independently
    /// merged against the receiver's `ClusterView`.
    Update(Vec<WireMember>),
    Ping { from: NodeId, incarnation: u64 },
    Ack { from: NodeId, incarnation: u64 },
    /// Graceful departure: the sender marks itself DEAD at a bumped
    /// incarnation and disseminates it before shutting down, so peers
    /// don't have to wait out the suspect/dead timeout windows.
    Leave { from: NodeId, incarnation: u64 },
}

/// `ClusterMember` without `bincode::Encode/Decode` on `SocketAddr`'s
/// dependencies being guaranteed; round-tripped as strings to stay
/// independent of any particular address-encoding support in bincode.
#[derive(Debug, Clone, Encode, Decode)]
pub struct WireMember {
    pub node_id: NodeId,
    pub node_type_is_router: bool,
    pub gossip_addr: String,
    pub data_addr: String,
    pub ingress_addr: Option<String>,
    pub capabilities_bits: u8,
    pub state_code: u8,
    pub incarnation: u64,
    pub last_seen_ms: u64,
}

impl From<&ClusterMember> for WireMember {
    fn from(m: &ClusterMember) -> Self {
        Self {
            node_id: m.node_id,
            node_type_is_router: matches!(m.node_type, crate::config::NodeType::Router),
            gossip_addr: m.gossip_addr.to_string(),
            data_addr: m.data_addr.to_string(),
            ingress_addr: m.ingress_addr.map(|a| a.to_string()),
            capabilities_bits: m.capabilities.bits(),
            state_code: match m.state {
                MemberState::Alive => 0,
                MemberState::Suspect => 1,
                MemberState::Dead => 2,
            },
            incarnation: m.incarnation,
            last_seen_ms: m.last_seen_ms,
        }
    }
}

impl TryFrom<WireMember> for ClusterMember {
    type Error = crate::errors::RidgeError;

    fn try_from(w: WireMember) -> Result<Self, Self::Error> {
        use crate::errors::RidgeError;
        let gossip_addr: SocketAddr = w
            .gossip_addr
            .parse()
            .map_err(|_| RidgeError::Invalid("bad gossip_addr in wire member".into()))?;
        let data_addr: SocketAddr = w
            .data_addr
            .parse()
            .map_err(|_| RidgeError::Invalid("bad data_addr in wire member".into()))?;
        let ingress_addr = match w.ingress_addr {
            Some(s) => Some(
                s.parse()
                    .map_err(|_| RidgeError::Invalid("bad ingress_addr in wire member".into()))?,
            ),
            None => None,
        };
        Ok(ClusterMember {
            node_id: w.node_id,
            node_type: if w.node_type_is_router {
                crate::config::NodeType::Router
            } else {
                crate::config::NodeType::Worker
            },
            gossip_addr,
            data_addr,
            ingress_addr,
            capabilities: crate::cluster::member::Capabilities::from_bits_truncate(
                w.capabilities_bits,
            ),
            state: match w.state_code {
                1 => MemberState::Suspect,
                2 => MemberState::Dead,
                _ => MemberState::Alive,
            },
            incarnation: w.incarnation,
            last_seen_ms: w.last_seen_ms,
        })
    }
}

/// Requests the RPC/handler layer sends into the gossip task.
pub enum GossipCommand {
    Join(SocketAddr),
}

pub struct GossipEngine {
    view: Arc<ClusterView>,
    socket: Arc<UdpSocket>,
    gossip_interval: Duration,
    probe_interval: Duration,
    suspect_timeout_ms: u64,
    dead_timeout_ms: u64,
    /// The peer and send time of the most recent outstanding probe, used
    /// to attribute the matching Ack (or a timeout) to a round-trip time.
    pending_probe: StdMutex<Option<(NodeId, Instant)>>,
}

impl GossipEngine {
    pub async fn bind(
        view: Arc<ClusterView>,
        config: &Config,
    ) -> crate::errors::Result<Self> {
        let socket = UdpSocket::bind(config.ports.gossip_addr).await?;
        socket.set_broadcast(false).ok();
        Ok(Self {
            view,
            socket: Arc::new(socket),
            gossip_interval: Duration::from_millis(config.gossip_interval_ms),
            probe_interval: Duration::from_millis(config.probe_interval_ms),
            suspect_timeout_ms: config.suspect_timeout_ms,
            dead_timeout_ms: config.dead_timeout_ms,
            pending_probe: StdMutex::new(None),
        })
    }

    /// Marks the local node DEAD at a bumped incarnation and disseminates
    /// that to every known peer — the graceful LEAVE contract: a node
    /// stepping down tells the cluster instead of waiting to be timed out.
    pub async fn leave(&self) {
        let incarnation = self.view.bump_local_incarnation();
        self.view.set_local_state(MemberState::Dead, incarnation);
        let payload = encode(&GossipWireMessage::Leave {
            from: self.view.local_id(),
            incarnation,
        });
        let peers: Vec<SocketAddr> = self
            .view
            .alive_members()
            .into_iter()
            .filter(|m| m.node_id != self.view.local_id())
            .map(|m| m.gossip_addr)
            .collect();
        for peer in peers {
            let _ = self.socket.send_to(&payload, peer).await;
        }
    }

    /// Sends an initial `Update` containing our own record to each seed
    /// router so we appear in their views without waiting for a gossip tick.
    pub async fn join_seeds(&self, seeds: &[SocketAddr]) {
        let local = self.view.local();
        let payload = encode(&GossipWireMessage::Update(vec![WireMember::from(&local)]));
        for seed in seeds {
            if let Err(e) = self.socket.send_to(&payload, seed).await {
                warn!(target: "ridgedb::cluster::gossip", %seed, error = %e, "failed to send join message");
            }
        }
    }

    pub async fn run(
        self,
        mut commands: mpsc::Receiver<GossipCommand>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut gossip_tick = interval(self.gossip_interval);
        gossip_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut probe_tick = interval(self.probe_interval);
        probe_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut recv_buf = vec![0u8; MAX_DATAGRAM_BYTES];

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!(target: "ridgedb::cluster::gossip", "gossip engine shutting down");
                    self.leave().await;
                    return;
                }
                Some(cmd) = commands.recv() => {
                    match cmd {
                        GossipCommand::Join(addr) => self.join_seeds(&[addr]).await,
                    }
                }
                _ = gossip_tick.tick() => {
                    self.gossip_round().await;
                }
                _ = probe_tick.tick() => {
                    self.probe_round().await;
                    self.sweep_timeouts();
                }
                recv = self.socket.recv_from(&mut recv_buf) => {
                    match recv {
                        Ok((len, from)) => self.handle_datagram(&recv_buf[..len], from).await,
                        Err(e) => warn!(target: "ridgedb::cluster::gossip", error = %e, "udp recv error"),
                    }
                }
            }
        }
    }

    async fn gossip_round(&self) {
        let members = self.view.snapshot();
        if members.len() <= 1 {
            return;
        }
        let mut rng = rand::thread_rng();
        let mut peers: Vec<&ClusterMember> = members
            .iter()
            .filter(|m| m.node_id != self.view.local_id())
            .collect();
        peers.shuffle(&mut rng);

        let wire: Vec<WireMember> = members.iter().map(WireMember::from).collect();
        let payload = encode(&GossipWireMessage::Update(wire));
        for peer in peers.into_iter().take(GOSSIP_FANOUT) {
            if let Err(e) = self.socket.send_to(&payload, peer.gossip_addr).await {
                debug!(target: "ridgedb::cluster::gossip", peer = peer.node_id, error = %e, "gossip send failed");
            }
        }
    }

    async fn probe_round(&self) {
        let members = self.view.alive_members();
        let candidates: Vec<&ClusterMember> = members
            .iter()
            .filter(|m| m.node_id != self.view.local_id())
            .collect();
        let Some(target) = candidates.choose(&mut rand::thread_rng()) else {
            return;
        };
        let local = self.view.local();
        let payload = encode(&GossipWireMessage::Ping {
            from: self.view.local_id(),
            incarnation: local.incarnation,
        });
        if let Err(e) = self.socket.send_to(&payload, target.gossip_addr).await {
            debug!(target: "ridgedb::cluster::gossip", peer = target.node_id, error = %e, "probe send failed");
            return;
        }
        *self.pending_probe.lock().unwrap() = Some((target.node_id, Instant::now()));
    }

    /// Moves members that have not refreshed within the configured windows
    /// through Alive -> Suspect -> Dead.
    fn sweep_timeouts(&self) {
        for node_id in self
            .view
            .stale_members(self.suspect_timeout_ms, MemberState::Alive)
        {
            info!(target: "ridgedb::cluster::gossip", node_id, "marking peer suspect");
            let incarnation = self.view.get(node_id).map(|m| m.incarnation).unwrap_or(0);
            self.view.mark_suspect(node_id, incarnation);
            self.resolve_pending_probe_as(node_id, "timeout", self.suspect_timeout_ms as f64);
        }
        for node_id in self
            .view
            .stale_members(self.dead_timeout_ms, MemberState::Suspect)
        {
            warn!(target: "ridgedb::cluster::gossip", node_id, "marking peer dead");
            let incarnation = self.view.get(node_id).map(|m| m.incarnation).unwrap_or(0);
            self.view.mark_dead(node_id, incarnation);
        }
    }

    fn resolve_pending_probe_as(&self, node_id: NodeId, outcome: &str, millis: f64) {
        let mut pending = self.pending_probe.lock().unwrap();
        if matches!(*pending, Some((id, _)) if id == node_id) {
            GOSSIP_RTT_MS.with_label_values(&[outcome]).observe(millis);
            *pending = None;
        }
    }

    async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
        let message: GossipWireMessage = match decode(bytes) {
            Ok(m) => m,
            Err(e) => {
                debug!(target: "ridgedb::cluster::gossip", %from, error = %e, "dropping malformed gossip datagram");
                return;
            }
        };
        match message {
            GossipWireMessage::Update(members) => {
                for wire in members {
                    match ClusterMember::try_from(wire) {
                        Ok(member) => {
                            if let Err(e) = self.view.merge(member) {
                                warn!(target: "ridgedb::cluster::gossip", error = %e, "merge rejected");
                            }
                        }
                        Err(e) => debug!(target: "ridgedb::cluster::gossip", error = %e, "bad wire member"),
                    }
                }
            }
            GossipWireMessage::Ping { from: sender, incarnation } => {
                self.view.mark_alive(sender, incarnation);
                self.view.touch(sender);
                let local = self.view.local();
                let ack = encode(&GossipWireMessage::Ack {
                    from: self.view.local_id(),
                    incarnation: local.incarnation,
                });
                let _ = self.socket.send_to(&ack, from).await;
            }
            GossipWireMessage::Ack { from: sender, incarnation } => {
                self.view.mark_alive(sender, incarnation);
                self.view.touch(sender);
                let mut pending = self.pending_probe.lock().unwrap();
                if let Some((node_id, sent_at)) = *pending {
                    if node_id == sender {
                        GOSSIP_RTT_MS
                            .with_label_values(&["ok"])
                            .observe(sent_at.elapsed().as_secs_f64() * 1000.0);
                        *pending = None;
                    }
                }
            }
            GossipWireMessage::Leave { from: sender, incarnation } => {
                self.view.mark_dead(sender, incarnation);
                self.view.touch(sender);
            }
        }
    }
}

fn encode(message: &GossipWireMessage) -> Vec<u8> {
    bincode::encode_to_vec(message, bincode::config::standard())
        .expect("gossip message always encodable")
}

fn decode(bytes: &[u8]) -> crate::errors::Result<GossipWireMessage> {
    let (message, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(message)
}
