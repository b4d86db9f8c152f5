// src/node/handlers.rs

//! Exhaustive, compile-time dispatch over function ids within a channel —
//! replaces the original design's runtime-built handler map (see
//! REDESIGN FLAGS). Capabilities gate which channels exist at all; this
//! module only runs for a message that already made it past that gate.

use crate::cluster::member::ClusterMember;
use crate::datastore::Record;
use crate::errors::{RidgeError, StatusCode};
use crate::metrics::{RPC_ERRORS_TOTAL, RPC_LATENCY_MS, RPC_REQUESTS_TOTAL};
use crate::node::state::NodeState;
use crate::raft::log::RaftCommand;
use crate::raft::{AppendEntriesRequest, InstallSnapshotRequest, RaftStatus, RequestVoteRequest};
use crate::rpc::frame::Channel;
use crate::rpc::{
    FUNC_CLUSTER_JOIN, FUNC_DATASTORE_GET, FUNC_DATASTORE_LIST, FUNC_DATASTORE_SET,
    FUNC_DATASTORE_SYNC, FUNC_DATASTORE_UNSET, FUNC_RAFT_APPEND_ENTRIES,
    FUNC_RAFT_INSTALL_SNAPSHOT, FUNC_RAFT_KV_GET, FUNC_RAFT_KV_SET, FUNC_RAFT_KV_UNSET,
    FUNC_RAFT_REQUEST_VOTE, FUNC_RAFT_STATUS, decode_payload, encode_payload,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct SetRequest {
    pub key: Bytes,
    pub value: Bytes,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetResponse {
    pub ack: bool,
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetRequest {
    pub key: Bytes,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    pub found: bool,
    pub value: Bytes,
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnsetRequest {
    pub key: Bytes,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnsetResponse {
    pub ack: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub keys: Vec<Bytes>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncRequest {
    pub records: Vec<(Bytes, Record)>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    pub member: ClusterMember,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RaftKvSetResponse {
    pub success: bool,
    pub index: u64,
    pub term: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RaftKvUnsetResponse {
    pub success: bool,
}

/// Dispatches one decoded request to its handler and encodes the response.
/// Returns `(status_byte, response_payload)`.
pub async fn dispatch(
    state: &Arc<NodeState>,
    channel: Channel,
    func_id: u32,
    payload: Bytes,
) -> (u8, Bytes) {
    let channel_label = match channel {
        Channel::Data => "data",
        Channel::Ingress => "ingress",
    };
    let func_label = func_id.to_string();
    RPC_REQUESTS_TOTAL
        .with_label_values(&[channel_label, &func_label])
        .inc();
    let started = Instant::now();

    let result = if channel == Channel::Ingress && !is_ingress_allowed(func_id) {
        Err(RidgeError::Invalid(format!(
            "func_id {func_id} is not permitted on the ingress channel"
        )))
    } else {
        route(state, func_id, payload).await
    };

    RPC_LATENCY_MS
        .with_label_values(&[channel_label, &func_label])
        .observe(started.elapsed().as_secs_f64() * 1000.0);

    match result {
        Ok(payload) => (StatusCode::Ok as u8, payload),
        Err(e) => {
            let status = e.status_code();
            RPC_ERRORS_TOTAL
                .with_label_values(&[channel_label, &func_label, &format!("{status:?}")])
                .inc();
            (status as u8, encode_payload(&e.to_string()))
        }
    }
}

/// The ingress (client-facing) channel only exposes datastore operations
/// and the Raft KV overlay; cluster-internal RPCs (gossip join, raft vote
/// and log replication) are DATA-channel only.
fn is_ingress_allowed(func_id: u32) -> bool {
    matches!(
        func_id,
        FUNC_DATASTORE_SET
            | FUNC_DATASTORE_GET
            | FUNC_DATASTORE_UNSET
            | FUNC_DATASTORE_LIST
            | FUNC_RAFT_KV_SET
            | FUNC_RAFT_KV_GET
            | FUNC_RAFT_KV_UNSET
            | FUNC_RAFT_STATUS
    )
}

async fn route(state: &Arc<NodeState>, func_id: u32, payload: Bytes) -> crate::errors::Result<Bytes> {
    match func_id {
        FUNC_DATASTORE_SET => {
            let req: SetRequest = decode_payload(&payload)?;
            let version = crate::cluster::member::now_ms();
            let record = Record::new(req.value, version, state.local_id());
            let assigned_version = record.version;
            state.datastore.apply(req.key, record)?;
            Ok(encode_payload(&SetResponse {
                ack: true,
                version: assigned_version,
            }))
        }
        FUNC_DATASTORE_GET => {
            let req: GetRequest = decode_payload(&payload)?;
            Ok(encode_payload(&get_response(state, &req.key)))
        }
        FUNC_DATASTORE_UNSET => {
            let req: UnsetRequest = decode_payload(&payload)?;
            state.datastore.unset(&req.key, state.local_id())?;
            Ok(encode_payload(&UnsetResponse { ack: true }))
        }
        FUNC_DATASTORE_LIST => {
            let keys = state.datastore.list_keys();
            Ok(encode_payload(&ListResponse { keys }))
        }
        FUNC_DATASTORE_SYNC => {
            let req: SyncRequest = decode_payload(&payload)?;
            for (key, record) in req.records {
                state.datastore.apply(key, record)?;
            }
            Ok(Bytes::new())
        }
        FUNC_CLUSTER_JOIN => {
            let req: JoinRequest = decode_payload(&payload)?;
            state.view.merge(req.member)?;
            Ok(Bytes::new())
        }
        FUNC_RAFT_STATUS => {
            let raft = state.raft.as_ref().ok_or(RidgeError::Invalid("raft not enabled".into()))?;
            let status: RaftStatus = raft.status().await;
            Ok(encode_payload(&status))
        }
        FUNC_RAFT_KV_SET => {
            let req: SetRequest = decode_payload(&payload)?;
            let raft = state.raft.as_ref().ok_or(RidgeError::Invalid("raft not enabled".into()))?;
            let (index, term) = raft
                .propose(RaftCommand::Set { key: req.key, value: req.value })
                .await?;
            Ok(encode_payload(&RaftKvSetResponse {
                success: true,
                index,
                term,
            }))
        }
        FUNC_RAFT_KV_GET => {
            let req: GetRequest = decode_payload(&payload)?;
            let raft = state.raft.as_ref().ok_or(RidgeError::Invalid("raft not enabled".into()))?;
            // Linearizable read: confirm this node is still leader via a
            // majority heartbeat round before serving from applied state.
            raft.confirm_leadership().await?;
            Ok(encode_payload(&get_response(state, &req.key)))
        }
        FUNC_RAFT_KV_UNSET => {
            let req: UnsetRequest = decode_payload(&payload)?;
            let raft = state.raft.as_ref().ok_or(RidgeError::Invalid("raft not enabled".into()))?;
            raft.propose(RaftCommand::Unset { key: req.key }).await?;
            Ok(encode_payload(&RaftKvUnsetResponse { success: true }))
        }
        FUNC_RAFT_REQUEST_VOTE => {
            let raft = state.raft.as_ref().ok_or(RidgeError::Invalid("raft not enabled".into()))?;
            let req: RequestVoteRequest = decode_payload(&payload)?;
            Ok(encode_payload(&raft.handle_request_vote(req).await))
        }
        FUNC_RAFT_APPEND_ENTRIES => {
            let raft = state.raft.as_ref().ok_or(RidgeError::Invalid("raft not enabled".into()))?;
            let req: AppendEntriesRequest = decode_payload(&payload)?;
            Ok(encode_payload(&raft.handle_append_entries(req).await))
        }
        FUNC_RAFT_INSTALL_SNAPSHOT => {
            let raft = state.raft.as_ref().ok_or(RidgeError::Invalid("raft not enabled".into()))?;
            let req: InstallSnapshotRequest = decode_payload(&payload)?;
            Ok(encode_payload(
                &raft.handle_install_snapshot(req, &state.datastore).await,
            ))
        }
        other => Err(RidgeError::Invalid(format!("unknown func_id {other}"))),
    }
}

/// A missing or tombstoned key is a successful `found: false` response,
/// not a wire-level error — NOT_FOUND-on-GET must not fail the RPC.
fn get_response(state: &Arc<NodeState>, key: &Bytes) -> GetResponse {
    match state.datastore.get(key) {
        Some(record) => GetResponse {
            found: true,
            value: record.value,
            version: record.version,
        },
        None => GetResponse {
            found: false,
            value: Bytes::new(),
            version: 0,
        },
    }
}
