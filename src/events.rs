// src/events.rs

//! A small broadcast bus for membership transitions. Handlers, the gossip
//! engine, and tests all subscribe to the same feed instead of polling
//! `ClusterView` for diffs.

use crate::cluster::member::NodeId;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberEvent {
    Joined(NodeId),
    Left(NodeId),
    Suspect(NodeId),
    Failed(NodeId),
    Updated(NodeId),
}

#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<MemberEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MemberEvent> {
        self.tx.subscribe()
    }

    /// Publishing is best-effort: with no subscribers this is a no-op, the
    /// same as the teacher's event bus treats a lagging/absent receiver.
    pub fn publish(&self, event: MemberEvent) {
        let _ = self.tx.send(event);
    }
}
