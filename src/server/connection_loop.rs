// src/server/connection_loop.rs

//! Accepts connections on the DATA listener and, if advertised, the
//! INGRESS listener, spawning one task per connection — the reactor/
//! acceptor/handler-thread model of spec.md §4.1/§5 realized as the
//! Tokio reactor plus a lightweight task per connection, per SPEC_FULL.md.

use crate::errors::RidgeError;
use crate::node::handlers;
use crate::node::state::NodeState;
use crate::rpc::frame::{Channel, RequestCodec, ResponseCodec, ResponseFrame};
use crate::server::context::ServerContext;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

pub async fn run(context: ServerContext, mut background_tasks: JoinSet<()>) {
    let ServerContext {
        state,
        data_listener,
        ingress_listener,
    } = context;

    let mut shutdown_rx = state.subscribe_shutdown();
    let mut connection_tasks = JoinSet::new();

    accept_on(
        data_listener,
        Channel::Data,
        state.clone(),
        &mut connection_tasks,
        state.subscribe_shutdown(),
    );
    if let Some(ingress_listener) = ingress_listener {
        accept_on(
            ingress_listener,
            Channel::Ingress,
            state.clone(),
            &mut connection_tasks,
            state.subscribe_shutdown(),
        );
    }

    tokio::select! {
        _ = shutdown_rx.recv() => {
            info!(target: "ridgedb::server", "shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!(target: "ridgedb::server", "ctrl-c received, shutting down");
            state.shutdown();
        }
    }

    connection_tasks.abort_all();
    while connection_tasks.join_next().await.is_some() {}
    while background_tasks.join_next().await.is_some() {}
}

fn accept_on(
    listener: TcpListener,
    channel: Channel,
    state: Arc<NodeState>,
    connection_tasks: &mut JoinSet<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    connection_tasks.spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => return,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            stream.set_nodelay(true).ok();
                            debug!(target: "ridgedb::server", %peer_addr, ?channel, "accepted connection");
                            let state = state.clone();
                            let conn_shutdown = state.subscribe_shutdown();
                            tokio::spawn(handle_connection(stream, channel, state, conn_shutdown));
                        }
                        Err(e) => {
                            warn!(target: "ridgedb::server", error = %e, "accept failed");
                        }
                    }
                }
            }
        }
    });
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    channel: Channel,
    state: Arc<NodeState>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut req_framed = Framed::new(stream, RequestCodec);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => return,
            frame = req_framed.next() => {
                let Some(frame) = frame else { return; };
                let request = match frame {
                    Ok(r) => r,
                    Err(RidgeError::Protocol(msg)) => {
                        debug!(target: "ridgedb::server", %msg, "closing connection on protocol error");
                        return;
                    }
                    Err(e) => {
                        debug!(target: "ridgedb::server", error = %e, "closing connection on decode error");
                        return;
                    }
                };

                let (status, response_payload) =
                    handlers::dispatch(&state, channel, request.func_id, request.payload).await;

                let response = ResponseFrame {
                    channel,
                    func_id: request.func_id,
                    status,
                    payload: response_payload,
                };

                // Swap codecs to write the response on the same stream.
                let stream = req_framed.into_inner();
                let mut resp_framed = Framed::new(stream, ResponseCodec);
                if let Err(e) = resp_framed.send(response).await {
                    debug!(target: "ridgedb::server", error = %e, "failed to write response");
                    return;
                }
                req_framed = Framed::new(resp_framed.into_inner(), RequestCodec);
            }
        }
    }
}
