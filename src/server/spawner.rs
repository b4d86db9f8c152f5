// src/server/spawner.rs

//! Spawns all of the node's long-running background tasks: the gossip
//! engine, the Raft driver (if enabled), the cleanup sweep, the metrics
//! updater, and the metrics HTTP exporter.

use crate::cluster::{GossipCommand, GossipEngine};
use crate::metrics::{CLUSTER_MEMBERS, RAFT_COMMIT_INDEX, RAFT_TERM};
use crate::server::context::ServerContext;
use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::info;

/// How long a DEAD member is retained before being pruned from the view.
const DEAD_PRUNE_AFTER_MS: u64 = 5 * 60 * 1000;
/// How long a tombstoned key is retained before being purged from the
/// datastore.
const TOMBSTONE_RETENTION_MS: u64 = 5 * 60 * 1000;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const METRICS_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

pub async fn spawn_all(context: &ServerContext) -> Result<JoinSet<()>> {
    let mut tasks = JoinSet::new();
    let state = context.state.clone();

    let gossip_engine = GossipEngine::bind(state.view.clone(), &state.config).await?;
    let (_gossip_cmd_tx, gossip_cmd_rx) = mpsc::channel::<GossipCommand>(16);
    gossip_engine
        .join_seeds(&state.config.routers)
        .await;
    let shutdown_rx = state.subscribe_shutdown();
    tasks.spawn(async move {
        gossip_engine.run(gossip_cmd_rx, shutdown_rx).await;
    });

    if let Some(raft) = state.raft.clone() {
        let shutdown_rx = state.subscribe_shutdown();
        tasks.spawn(async move {
            raft.run(shutdown_rx).await;
        });
    }

    if let Some(metrics_addr) = state.config.ports.metrics_addr {
        let shutdown_rx = state.subscribe_shutdown();
        tasks.spawn(async move {
            if let Err(e) = crate::server::metrics_server::run(metrics_addr, shutdown_rx).await {
                tracing::error!(target: "ridgedb::server", error = %e, "metrics server exited");
            }
        });
    }

    {
        let state = state.clone();
        let mut shutdown_rx = state.subscribe_shutdown();
        tasks.spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let pruned = state.view.prune_dead(DEAD_PRUNE_AFTER_MS);
                        let purged = state.datastore.purge_tombstones(TOMBSTONE_RETENTION_MS);
                        if pruned > 0 || purged > 0 {
                            info!(
                                target: "ridgedb::server",
                                pruned, purged, "cleanup sweep completed"
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => return,
                }
            }
        });
    }

    {
        let state = state.clone();
        let mut shutdown_rx = state.subscribe_shutdown();
        tasks.spawn(async move {
            let mut ticker = tokio::time::interval(METRICS_UPDATE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let members = state.view.snapshot();
                        CLUSTER_MEMBERS.set(members.len() as i64);
                        for member in &members {
                            if member.node_id == state.local_id() {
                                continue;
                            }
                            state.peer_pool.upsert(member.node_id, member.data_addr, member.capabilities);
                            state.peer_pool.update_status(member.node_id, member.state);
                        }
                        if let Some(raft) = &state.raft {
                            let status = raft.status().await;
                            RAFT_TERM.set(status.term as i64);
                            RAFT_COMMIT_INDEX.set(status.commit_index as i64);
                        }
                    }
                    _ = shutdown_rx.recv() => return,
                }
            }
        });
    }

    info!(target: "ridgedb::server", "background tasks spawned");
    Ok(tasks)
}
