// tests/integration_test.rs
//
// Entry point for the black-box scenario suite; each scenario lives in its
// own file under tests/integration/ and is wired in here as a module so
// they share one test binary (and one `common` harness) instead of
// recompiling it once per file.

#[path = "integration/common.rs"]
mod common;

#[path = "integration/single_node_datastore.rs"]
mod single_node_datastore;

#[path = "integration/gossip_convergence.rs"]
mod gossip_convergence;

#[path = "integration/lww_merge.rs"]
mod lww_merge;

#[path = "integration/failure_detection.rs"]
mod failure_detection;

#[path = "integration/raft_linearizable.rs"]
mod raft_linearizable;
