// tests/integration/failure_detection.rs
//
// S4: a node that stops participating in gossip is moved Alive -> Suspect
// -> Dead within the configured timeout windows. S5: a node that rejoins
// with a bumped incarnation is accepted again even though the rest of the
// cluster still holds a Dead record for it.
//
// Both scenarios use the accelerated suspect/dead timeouts from
// `test_config` so the test does not need to sleep for production-scale
// windows.

use crate::common::{TestNode, test_config, wait_until};
use ridgedb::cluster::{ClusterMember, MemberState};
use std::time::Duration;

#[tokio::test]
async fn silent_peer_is_marked_suspect_then_dead() {
    let node_a = TestNode::spawn(test_config(1, vec![], false)).await;
    let seed = node_a.state.config.ports.gossip_addr;
    let node_b = TestNode::spawn(test_config(2, vec![seed], false)).await;

    wait_until(Duration::from_secs(2), || node_a.view().len() == 2).await;

    // Stop node_b's gossip engine; node_a's probe/sweep loop must notice
    // the silence and escalate Alive -> Suspect -> Dead.
    node_b.shutdown();

    wait_until(Duration::from_secs(2), || {
        node_a
            .view()
            .get(2)
            .map(|m| m.state == MemberState::Suspect)
            .unwrap_or(false)
    })
    .await;

    wait_until(Duration::from_secs(2), || {
        node_a
            .view()
            .get(2)
            .map(|m| m.state == MemberState::Dead)
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn rejoin_with_higher_incarnation_supersedes_dead_record() {
    let node = TestNode::spawn(test_config(1, vec![], false)).await;

    let dead_record = ClusterMember {
        node_id: 2,
        node_type: ridgedb::config::NodeType::Worker,
        gossip_addr: "127.0.0.1:19000".parse().unwrap(),
        data_addr: "127.0.0.1:19001".parse().unwrap(),
        ingress_addr: None,
        capabilities: ridgedb::cluster::Capabilities::empty(),
        state: MemberState::Dead,
        incarnation: 4,
        last_seen_ms: ridgedb::cluster::member::now_ms(),
    };
    node.view().merge(dead_record).unwrap();
    assert_eq!(node.view().get(2).unwrap().state, MemberState::Dead);

    let rejoined = ClusterMember {
        node_id: 2,
        node_type: ridgedb::config::NodeType::Worker,
        gossip_addr: "127.0.0.1:19000".parse().unwrap(),
        data_addr: "127.0.0.1:19001".parse().unwrap(),
        ingress_addr: None,
        capabilities: ridgedb::cluster::Capabilities::empty(),
        state: MemberState::Alive,
        incarnation: 5,
        last_seen_ms: ridgedb::cluster::member::now_ms(),
    };
    assert!(node.view().merge(rejoined).unwrap());
    assert_eq!(node.view().get(2).unwrap().state, MemberState::Alive);
    assert_eq!(node.view().get(2).unwrap().incarnation, 5);
}
