// tests/integration/common.rs

//! Shared harness for black-box scenario tests: binds real loopback
//! sockets and drives `NodeState` through the same RPC dispatch the
//! production server uses, without going through `server::run` (which
//! owns process-wide logging init that tests must not fight over).

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use ridgedb::cluster::{ClusterView, GossipEngine};
use ridgedb::config::{Config, NodeType, PortsConfig};
use ridgedb::node::NodeState;
use ridgedb::node::handlers;
use ridgedb::rpc::frame::{Channel, RequestCodec, ResponseCodec, ResponseFrame};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

pub fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub fn test_config(node_id: u16, routers: Vec<SocketAddr>, raft_enabled: bool) -> Config {
    Config {
        cluster_name: "ridgedb-test".into(),
        node_id,
        node_type: NodeType::Worker,
        ports: PortsConfig {
            gossip_addr: free_addr(),
            data_addr: free_addr(),
            ingress_addr: Some(free_addr()),
            metrics_addr: None,
        },
        routers,
        log_level: "error".into(),
        raft_enabled,
        gossip_interval_ms: 20,
        probe_interval_ms: 30,
        suspect_timeout_ms: 150,
        dead_timeout_ms: 400,
        election_timeout_min_ms: 60,
        election_timeout_max_ms: 120,
        heartbeat_interval_ms: 20,
        datastore_capacity: 10_000,
    }
}

/// A running test node: its `NodeState` plus the background tasks keeping
/// its DATA-channel RPC server and gossip engine alive.
pub struct TestNode {
    pub state: Arc<NodeState>,
}

impl TestNode {
    pub async fn spawn(config: Config) -> Self {
        let data_addr = config.ports.data_addr;
        let ingress_addr = config.ports.ingress_addr.unwrap();
        let state = NodeState::bootstrap(config);

        let data_listener = TcpListener::bind(data_addr).await.unwrap();
        let ingress_listener = TcpListener::bind(ingress_addr).await.unwrap();
        spawn_rpc_server(data_listener, Channel::Data, state.clone());
        spawn_rpc_server(ingress_listener, Channel::Ingress, state.clone());

        let gossip = GossipEngine::bind(state.view.clone(), &state.config)
            .await
            .unwrap();
        gossip.join_seeds(&state.config.routers).await;
        let (_tx, rx) = mpsc::channel(1);
        let shutdown = state.subscribe_shutdown();
        tokio::spawn(gossip.run(rx, shutdown));

        if let Some(raft) = state.raft.clone() {
            let shutdown = state.subscribe_shutdown();
            tokio::spawn(raft.run(shutdown));
        }

        TestNode { state }
    }

    pub fn view(&self) -> &Arc<ClusterView> {
        &self.state.view
    }

    /// Stops this node's background gossip/Raft tasks without closing its
    /// listeners, simulating a node that has stopped participating in the
    /// cluster (e.g. a partitioned or crashed leader) while still letting
    /// tests assert on its last-known local state.
    pub fn shutdown(&self) {
        self.state.shutdown();
    }
}

fn spawn_rpc_server(listener: TcpListener, channel: Channel, state: Arc<NodeState>) {
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let state = state.clone();
            tokio::spawn(async move {
                let mut req_framed = Framed::new(stream, RequestCodec);
                while let Some(Ok(request)) = req_framed.next().await {
                    let (status, payload) =
                        handlers::dispatch(&state, channel, request.func_id, request.payload).await;
                    let response = ResponseFrame {
                        channel,
                        func_id: request.func_id,
                        status,
                        payload,
                    };
                    let stream = req_framed.into_inner();
                    let mut resp_framed = Framed::new(stream, ResponseCodec);
                    if resp_framed.send(response).await.is_err() {
                        return;
                    }
                    req_framed = Framed::new(resp_framed.into_inner(), RequestCodec);
                }
            });
        }
    });
}

pub async fn call(
    addr: SocketAddr,
    channel: Channel,
    func_id: u32,
    payload: Bytes,
) -> (u8, Bytes) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut req_framed = Framed::new(stream, RequestCodec);
    req_framed
        .send(ridgedb::rpc::frame::RequestFrame {
            channel,
            func_id,
            payload,
        })
        .await
        .unwrap();
    let stream = req_framed.into_inner();
    let mut resp_framed = Framed::new(stream, ResponseCodec);
    let response = resp_framed.next().await.unwrap().unwrap();
    (response.status, response.payload)
}

pub async fn wait_until<F>(timeout: Duration, mut predicate: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within {timeout:?}");
}
