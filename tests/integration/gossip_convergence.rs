// tests/integration/gossip_convergence.rs
//
// S2: three nodes seeded with each other's gossip addresses converge to the
// same alive membership view.

use crate::common::{TestNode, test_config, wait_until};
use ridgedb::cluster::MemberState;
use std::time::Duration;

#[tokio::test]
async fn three_nodes_converge_on_membership() {
    let node_a = TestNode::spawn(test_config(1, vec![], false)).await;
    let seed = node_a.state.config.ports.gossip_addr;

    let node_b = TestNode::spawn(test_config(2, vec![seed], false)).await;
    let node_c = TestNode::spawn(test_config(3, vec![seed], false)).await;

    wait_until(Duration::from_secs(3), || {
        node_a.view().len() == 3 && node_b.view().len() == 3 && node_c.view().len() == 3
    })
    .await;

    for view in [node_a.view(), node_b.view(), node_c.view()] {
        for id in [1u16, 2, 3] {
            let member = view.get(id).expect("member present after convergence");
            assert_eq!(member.state, MemberState::Alive);
        }
    }
}
