// src/server/context.rs

use crate::node::NodeState;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Holds everything the connection-acceptance loop needs once setup has
/// run: the shared node state and the listeners for each channel this
/// node's capabilities advertise.
pub struct ServerContext {
    pub state: Arc<NodeState>,
    pub data_listener: TcpListener,
    pub ingress_listener: Option<TcpListener>,
}
