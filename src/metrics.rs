// src/metrics.rs

//! Process-wide Prometheus metrics registry, exposed over HTTP by
//! `server::metrics_server`.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder, register_histogram_vec,
    register_int_counter_vec, register_int_gauge,
};

const LATENCY_BUCKETS_MS: &[f64] = &[0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0];

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref RPC_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ridgedb_rpc_requests_total",
        "RPC requests handled, by channel and function id",
        &["channel", "func"]
    )
    .unwrap();
    pub static ref RPC_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ridgedb_rpc_errors_total",
        "RPC requests that returned a non-OK status, by channel, function id and status",
        &["channel", "func", "status"]
    )
    .unwrap();
    pub static ref RPC_LATENCY_MS: HistogramVec = register_histogram_vec!(
        "ridgedb_rpc_latency_ms",
        "RPC handler latency in milliseconds",
        &["channel", "func"],
        LATENCY_BUCKETS_MS.to_vec()
    )
    .unwrap();
    pub static ref GOSSIP_RTT_MS: HistogramVec = register_histogram_vec!(
        "ridgedb_gossip_rtt_ms",
        "Gossip probe round-trip time in milliseconds",
        &["outcome"],
        LATENCY_BUCKETS_MS.to_vec()
    )
    .unwrap();
    pub static ref CLUSTER_MEMBERS: IntGauge = register_int_gauge!(
        "ridgedb_cluster_members",
        "Number of members currently known to this node's cluster view"
    )
    .unwrap();
    pub static ref DATASTORE_KEYS: IntGauge = register_int_gauge!(
        "ridgedb_datastore_keys",
        "Number of keys currently held by the local datastore"
    )
    .unwrap();
    pub static ref RAFT_TERM: IntGauge =
        register_int_gauge!("ridgedb_raft_term", "Current Raft term").unwrap();
    pub static ref RAFT_COMMIT_INDEX: IntGauge =
        register_int_gauge!("ridgedb_raft_commit_index", "Current Raft commit index").unwrap();
}

/// Registers all metrics families with the shared registry. Must be called
/// once at startup before the first `/metrics` scrape.
pub fn init() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(RPC_REQUESTS_TOTAL.clone()),
        Box::new(RPC_ERRORS_TOTAL.clone()),
        Box::new(RPC_LATENCY_MS.clone()),
        Box::new(GOSSIP_RTT_MS.clone()),
        Box::new(CLUSTER_MEMBERS.clone()),
        Box::new(DATASTORE_KEYS.clone()),
        Box::new(RAFT_TERM.clone()),
        Box::new(RAFT_COMMIT_INDEX.clone()),
    ];
    for collector in collectors {
        let _ = REGISTRY.register(collector);
    }
}

/// Renders the registry in Prometheus text exposition format.
pub fn render() -> Vec<u8> {
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buf).ok();
    buf
}
