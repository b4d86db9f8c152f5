// src/node/state.rs

//! `NodeState` is the single `AppContext`-style object every handler and
//! background task borrows through an `Arc`, replacing a global service
//! registry. It exclusively owns the cluster view, peer pool, datastore,
//! event bus, and (when enabled) Raft state.

use crate::cluster::member::{ClusterMember, NodeId};
use crate::cluster::view::ClusterView;
use crate::config::Config;
use crate::datastore::Datastore;
use crate::events::EventBus;
use crate::node::peer_pool::PeerPool;
use crate::raft::RaftNode;
use crate::raft::log::RaftCommand;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct NodeState {
    pub config: Config,
    pub view: Arc<ClusterView>,
    pub peer_pool: Arc<PeerPool>,
    pub datastore: Arc<Datastore>,
    pub events: Arc<EventBus>,
    pub raft: Option<Arc<RaftNode>>,
    pub shutdown_tx: broadcast::Sender<()>,
}

/// Applies committed Raft log entries directly to the datastore, bypassing
/// the gossip-path LWW merge: Raft's log order is already the single
/// source of truth for keys under its control.
struct DatastoreApply {
    datastore: Arc<Datastore>,
    local_id: NodeId,
}

#[async_trait]
impl crate::raft::RaftApply for DatastoreApply {
    async fn apply(&self, command: &RaftCommand) {
        match command {
            RaftCommand::Set { key, value } => {
                let version = crate::cluster::member::now_ms();
                let _ = self.datastore.apply(
                    key.clone(),
                    crate::datastore::Record::new(value.clone(), version, self.local_id),
                );
            }
            RaftCommand::Unset { key } => {
                let _ = self.datastore.unset(key, self.local_id);
            }
            RaftCommand::Noop => {}
        }
    }
}

impl NodeState {
    pub fn bootstrap(config: Config) -> Arc<Self> {
        let local_member = ClusterMember::bootstrap(
            config.node_id,
            config.node_type,
            config.ports.gossip_addr,
            config.ports.data_addr,
            config.ports.ingress_addr,
            config.raft_enabled,
        );
        let events = Arc::new(EventBus::new());
        let view = Arc::new(ClusterView::new(local_member, events.clone()));
        let peer_pool = Arc::new(PeerPool::new());
        let datastore = Arc::new(Datastore::new(config.datastore_capacity));
        let (shutdown_tx, _rx) = broadcast::channel(1);

        let raft = if config.raft_enabled {
            let apply_cb: Arc<dyn crate::raft::RaftApply> = Arc::new(DatastoreApply {
                datastore: datastore.clone(),
                local_id: config.node_id,
            });
            Some(RaftNode::new(
                config.node_id,
                view.clone(),
                peer_pool.clone(),
                apply_cb,
                &config,
            ))
        } else {
            None
        };

        Arc::new(Self {
            config,
            view,
            peer_pool,
            datastore,
            events,
            raft,
            shutdown_tx,
        })
    }

    pub fn local_id(&self) -> NodeId {
        self.view.local_id()
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
