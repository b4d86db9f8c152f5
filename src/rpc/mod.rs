// src/rpc/mod.rs

//! RPC framing, function-id constants, and the client helper used by the
//! peer pool and Raft core to call other nodes over the DATA channel.

pub mod frame;

use crate::errors::{Result, RidgeError};
use crate::rpc::frame::{Channel, RequestCodec, RequestFrame, ResponseCodec};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

// DATASTORE_* function ids (DATA + INGRESS channels).
pub const FUNC_DATASTORE_SET: u32 = 1;
pub const FUNC_DATASTORE_GET: u32 = 2;
pub const FUNC_DATASTORE_UNSET: u32 = 3;
pub const FUNC_DATASTORE_LIST: u32 = 4;
pub const FUNC_DATASTORE_SYNC: u32 = 5;

// RAFT_* function ids (DATA channel only).
pub const FUNC_RAFT_REQUEST_VOTE: u32 = 10;
pub const FUNC_RAFT_APPEND_ENTRIES: u32 = 11;
pub const FUNC_RAFT_INSTALL_SNAPSHOT: u32 = 12;
pub const FUNC_RAFT_KV_SET: u32 = 13;
pub const FUNC_RAFT_KV_GET: u32 = 14;
pub const FUNC_RAFT_KV_UNSET: u32 = 15;
pub const FUNC_RAFT_STATUS: u32 = 16;

// Gossip-plane JOIN carried over the DATA channel RPC as a convenience for
// clients that cannot speak raw gossip UDP (used by tests only).
pub const FUNC_CLUSTER_JOIN: u32 = 20;

const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);
const CALL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Encodes an RPC payload. Payload types derive `serde::Serialize`; the
/// wire format is bincode, matching the teacher's choice for
/// cluster/gossip message bodies.
pub fn encode_payload<T: serde::Serialize>(value: &T) -> Bytes {
    Bytes::from(
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .expect("rpc payload always encodable"),
    )
}

pub fn decode_payload<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

/// A one-shot RPC call: connect, send one request, read one response, close.
/// The peer pool wraps this in a cached, lazily-opened handle; callers that
/// just need a single call (join, raft RPCs before a peer handle exists) can
/// use it directly.
pub async fn call(
    addr: SocketAddr,
    channel: Channel,
    func_id: u32,
    payload: Bytes,
) -> Result<(u8, Bytes)> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| RidgeError::Timeout)??;
    stream.set_nodelay(true).ok();

    let mut req_framed = Framed::new(stream, RequestCodec);
    req_framed
        .send(RequestFrame {
            channel,
            func_id,
            payload,
        })
        .await?;

    let stream = req_framed.into_inner();
    let mut resp_framed = Framed::new(stream, ResponseCodec);
    let response = tokio::time::timeout(CALL_TIMEOUT, resp_framed.next())
        .await
        .map_err(|_| RidgeError::Timeout)?
        .ok_or(RidgeError::Network("connection closed before response".into()))??;

    Ok((response.status, response.payload))
}
