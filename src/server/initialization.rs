// src/server/initialization.rs

//! Phase 1 of server startup: build `NodeState` and bind the listeners this
//! node's configuration calls for. Mirrors the teacher's
//! `ServerState::initialize` + listener-bind sequence, minus TLS (not part
//! of this crate's scope).

use crate::config::Config;
use crate::node::NodeState;
use crate::server::context::ServerContext;
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

pub async fn setup(config: Config) -> Result<ServerContext> {
    info!(
        target: "ridgedb::server",
        cluster = %config.cluster_name,
        node_id = config.node_id,
        "initializing node state"
    );

    let data_listener = TcpListener::bind(config.ports.data_addr)
        .await
        .with_context(|| format!("binding DATA listener on {}", config.ports.data_addr))?;

    let ingress_listener = match config.ports.ingress_addr {
        Some(addr) => Some(
            TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding INGRESS listener on {addr}"))?,
        ),
        None => None,
    };

    let state = NodeState::bootstrap(config);

    Ok(ServerContext {
        state,
        data_listener,
        ingress_listener,
    })
}
