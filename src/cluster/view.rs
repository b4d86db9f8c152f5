// src/cluster/view.rs

//! `ClusterView` is the single owner of membership state. It is wrapped in
//! an `Arc` by `NodeState` and borrowed by the gossip engine and every RPC
//! handler that needs to read or merge membership — never locked by more
//! than one of {datastore, cluster_view, peer_pool} at a time.

use crate::cluster::member::{ClusterMember, MemberState, NodeId, now_ms};
use crate::errors::{Result, RidgeError};
use crate::events::{EventBus, MemberEvent};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const DEFAULT_MAX_MEMBERS: usize = 4096;

#[derive(Debug)]
pub struct ClusterView {
    local_id: NodeId,
    members: DashMap<NodeId, ClusterMember>,
    max_members: usize,
    local_incarnation: AtomicU64,
    events: Arc<EventBus>,
}

impl ClusterView {
    pub fn new(local: ClusterMember, events: Arc<EventBus>) -> Self {
        let local_id = local.node_id;
        let members = DashMap::new();
        members.insert(local_id, local);
        Self {
            local_id,
            members,
            max_members: DEFAULT_MAX_MEMBERS,
            local_incarnation: AtomicU64::new(0),
            events,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn get(&self, node_id: NodeId) -> Option<ClusterMember> {
        self.members.get(&node_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn local(&self) -> ClusterMember {
        self.members
            .get(&self.local_id)
            .expect("local member always present")
            .clone()
    }

    /// A snapshot suitable for gossip dissemination or listing.
    pub fn snapshot(&self) -> Vec<ClusterMember> {
        self.members.iter().map(|r| r.value().clone()).collect()
    }

    pub fn alive_members(&self) -> Vec<ClusterMember> {
        self.members
            .iter()
            .filter(|r| r.value().state != MemberState::Dead)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Merges one incoming member record. Returns `Ok(true)` if it changed
    /// the view (new member, or an existing one superseded).
    pub fn merge(&self, incoming: ClusterMember) -> Result<bool> {
        if incoming.node_id == self.local_id {
            // Someone else's view of us; only matters if it disputes our
            // aliveness, in which case we must refute by bumping incarnation.
            self.maybe_refute(&incoming);
            return Ok(false);
        }

        match self.members.get(&incoming.node_id) {
            None => {
                if self.members.len() >= self.max_members {
                    return Err(RidgeError::Full);
                }
                let event = member_event(&incoming);
                self.members.insert(incoming.node_id, incoming);
                self.events.publish(event);
                Ok(true)
            }
            Some(existing) => {
                if existing.should_supersede(&incoming) {
                    let node_id = incoming.node_id;
                    let event = member_event(&incoming);
                    drop(existing);
                    self.members.insert(node_id, incoming);
                    self.events.publish(event);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// If `incoming` claims we are Suspect/Dead, refute by bumping our own
    /// incarnation and re-publishing ourselves as Alive.
    fn maybe_refute(&self, incoming: &ClusterMember) {
        if incoming.state == MemberState::Alive {
            return;
        }
        if incoming.incarnation < self.local_incarnation.load(Ordering::SeqCst) {
            return;
        }
        let new_incarnation = self.local_incarnation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(mut me) = self.members.get_mut(&self.local_id) {
            me.incarnation = new_incarnation;
            me.state = MemberState::Alive;
            me.touch();
        }
    }

    pub fn mark_suspect(&self, node_id: NodeId, incarnation: u64) {
        self.transition(node_id, MemberState::Suspect, incarnation);
    }

    pub fn mark_dead(&self, node_id: NodeId, incarnation: u64) {
        self.transition(node_id, MemberState::Dead, incarnation);
    }

    pub fn mark_alive(&self, node_id: NodeId, incarnation: u64) {
        self.transition(node_id, MemberState::Alive, incarnation);
    }

    /// Applies a state transition only if `incarnation >= current.incarnation`:
    /// a stale Ping/Ack or timeout decision carrying an old incarnation
    /// must not be able to revive a member a higher-incarnation record
    /// already marked Suspect/Dead. Reviving from Suspect/Dead therefore
    /// requires the sender to have actually bumped its incarnation
    /// (genuine SWIM refutation), not a bare acknowledgement.
    fn transition(&self, node_id: NodeId, state: MemberState, incarnation: u64) {
        if node_id == self.local_id {
            return;
        }
        let Some(mut member) = self.members.get_mut(&node_id) else {
            return;
        };
        if incarnation < member.incarnation {
            return;
        }
        let state_changed = member.state != state;
        member.state = state;
        member.incarnation = incarnation;
        member.touch();
        if state_changed {
            let event = match state {
                MemberState::Alive => MemberEvent::Updated(node_id),
                MemberState::Suspect => MemberEvent::Suspect(node_id),
                MemberState::Dead => MemberEvent::Failed(node_id),
            };
            drop(member);
            self.events.publish(event);
        }
    }

    /// Bumps and returns the local node's incarnation without changing its
    /// state — used just before asserting a new self-state (e.g. a
    /// graceful LEAVE) at the bumped number.
    pub fn bump_local_incarnation(&self) -> u64 {
        self.local_incarnation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Sets the local member's own state/incarnation directly, bypassing
    /// the remote-merge path — used for local transitions like graceful
    /// LEAVE where there is no incoming record to merge against.
    pub fn set_local_state(&self, state: MemberState, incarnation: u64) {
        if let Some(mut me) = self.members.get_mut(&self.local_id) {
            me.state = state;
            me.incarnation = incarnation;
            me.touch();
        }
    }

    /// Permanently removes members that have been DEAD for at least
    /// `threshold_ms`. Returns the number removed.
    pub fn prune_dead(&self, threshold_ms: u64) -> usize {
        let stale = self.stale_members(threshold_ms, MemberState::Dead);
        let count = stale.len();
        for node_id in stale {
            self.remove(node_id);
        }
        count
    }

    /// Refreshes `last_seen_ms` for an existing member, e.g. on probe
    /// round-trip completion. No-op if the member is unknown.
    pub fn touch(&self, node_id: NodeId) {
        if let Some(mut member) = self.members.get_mut(&node_id) {
            member.touch();
        }
    }

    pub fn remove(&self, node_id: NodeId) {
        if self.members.remove(&node_id).is_some() {
            self.events.publish(MemberEvent::Left(node_id));
        }
    }

    /// Members whose `last_seen_ms` is older than `threshold_ms`, excluding
    /// the local node — candidates for suspicion/failure timeouts.
    pub fn stale_members(&self, threshold_ms: u64, state: MemberState) -> Vec<NodeId> {
        let now = now_ms();
        self.members
            .iter()
            .filter(|r| {
                r.key() != &self.local_id
                    && r.value().state == state
                    && now.saturating_sub(r.value().last_seen_ms) >= threshold_ms
            })
            .map(|r| *r.key())
            .collect()
    }
}

fn member_event(member: &ClusterMember) -> MemberEvent {
    match member.state {
        MemberState::Alive => MemberEvent::Joined(member.node_id),
        MemberState::Suspect => MemberEvent::Suspect(member.node_id),
        MemberState::Dead => MemberEvent::Failed(member.node_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeType;

    fn member(id: NodeId, incarnation: u64, state: MemberState) -> ClusterMember {
        ClusterMember {
            node_id: id,
            node_type: NodeType::Worker,
            gossip_addr: "127.0.0.1:7000".parse().unwrap(),
            data_addr: "127.0.0.1:7001".parse().unwrap(),
            ingress_addr: None,
            capabilities: crate::cluster::member::Capabilities::empty(),
            state,
            incarnation,
            last_seen_ms: now_ms(),
        }
    }

    #[test]
    fn higher_incarnation_supersedes() {
        let view = ClusterView::new(member(1, 0, MemberState::Alive), Arc::new(EventBus::new()));
        assert!(view.merge(member(2, 0, MemberState::Alive)).unwrap());
        assert!(view.merge(member(2, 1, MemberState::Suspect)).unwrap());
        assert_eq!(view.get(2).unwrap().state, MemberState::Suspect);
    }

    #[test]
    fn same_incarnation_does_not_revive() {
        let view = ClusterView::new(member(1, 0, MemberState::Alive), Arc::new(EventBus::new()));
        view.merge(member(2, 3, MemberState::Dead)).unwrap();
        // Same incarnation, lower rank (Alive) must not overwrite Dead.
        assert!(!view.merge(member(2, 3, MemberState::Alive)).unwrap());
        assert_eq!(view.get(2).unwrap().state, MemberState::Dead);
    }

    #[test]
    fn mark_alive_with_stale_incarnation_does_not_revive_dead_peer() {
        let view = ClusterView::new(member(1, 0, MemberState::Alive), Arc::new(EventBus::new()));
        view.merge(member(2, 5, MemberState::Dead)).unwrap();

        // A delayed Ack carrying an old incarnation must not resurrect it.
        view.mark_alive(2, 3);
        assert_eq!(view.get(2).unwrap().state, MemberState::Dead);

        // A genuine refutation (higher incarnation) does revive it.
        view.mark_alive(2, 6);
        assert_eq!(view.get(2).unwrap().state, MemberState::Alive);
    }

    #[test]
    fn prune_dead_removes_only_stale_dead_members() {
        let view = ClusterView::new(member(1, 0, MemberState::Alive), Arc::new(EventBus::new()));
        view.merge(member(2, 1, MemberState::Dead)).unwrap();
        view.merge(member(3, 0, MemberState::Alive)).unwrap();

        assert_eq!(view.prune_dead(0), 1);
        assert!(view.get(2).is_none());
        assert!(view.get(3).is_some());
    }

    #[test]
    fn local_node_refutes_false_suspicion() {
        let view = ClusterView::new(member(1, 0, MemberState::Alive), Arc::new(EventBus::new()));
        view.merge(member(1, 0, MemberState::Suspect)).unwrap();
        let local = view.local();
        assert_eq!(local.state, MemberState::Alive);
        assert_eq!(local.incarnation, 1);
    }
}
