// tests/integration/lww_merge.rs
//
// S3: two conflicting writes for the same key converge to the higher
// version via the SYNC function id, exactly as a peer-to-peer anti-entropy
// push would apply it.

use crate::common::{TestNode, call, test_config};
use bytes::Bytes;
use ridgedb::datastore::Record;
use ridgedb::errors::StatusCode;
use ridgedb::node::handlers::{GetRequest, GetResponse, SyncRequest};
use ridgedb::rpc::frame::Channel;
use ridgedb::rpc::{FUNC_DATASTORE_GET, FUNC_DATASTORE_SYNC, decode_payload, encode_payload};

#[tokio::test]
async fn higher_version_wins_regardless_of_arrival_order() {
    let node = TestNode::spawn(test_config(1, vec![], false)).await;
    let ingress_addr = node.state.config.ports.ingress_addr.unwrap();
    let key = Bytes::from_static(b"counter");

    let stale = SyncRequest {
        records: vec![(key.clone(), Record::new(Bytes::from_static(b"stale"), 5, 9))],
    };
    let fresh = SyncRequest {
        records: vec![(key.clone(), Record::new(Bytes::from_static(b"fresh"), 7, 1))],
    };

    // Fresh record arrives first, stale arrives second: stale must not win.
    let (status, _) = call(
        ingress_addr,
        Channel::Ingress,
        FUNC_DATASTORE_SYNC,
        encode_payload(&fresh),
    )
    .await;
    assert_eq!(status, StatusCode::Invalid as u8, "SYNC is DATA-channel only");

    // SYNC is a cluster-internal operation; exercise it over the DATA
    // channel, which is what peer anti-entropy actually uses.
    let data_addr = node.state.config.ports.data_addr;
    let (status, _) = call(data_addr, Channel::Data, FUNC_DATASTORE_SYNC, encode_payload(&fresh)).await;
    assert_eq!(status, StatusCode::Ok as u8);
    let (status, _) = call(data_addr, Channel::Data, FUNC_DATASTORE_SYNC, encode_payload(&stale)).await;
    assert_eq!(status, StatusCode::Ok as u8);

    let (status, body) = call(
        ingress_addr,
        Channel::Ingress,
        FUNC_DATASTORE_GET,
        encode_payload(&GetRequest { key: key.clone() }),
    )
    .await;
    assert_eq!(status, StatusCode::Ok as u8);
    let response: GetResponse = decode_payload(&body).unwrap();
    assert!(response.found);
    assert_eq!(response.value, Bytes::from_static(b"fresh"));
}

#[tokio::test]
async fn equal_version_breaks_tie_on_owner_node() {
    let node = TestNode::spawn(test_config(1, vec![], false)).await;
    let data_addr = node.state.config.ports.data_addr;
    let key = Bytes::from_static(b"tie");

    let low_owner = SyncRequest {
        records: vec![(key.clone(), Record::new(Bytes::from_static(b"low"), 3, 1))],
    };
    let high_owner = SyncRequest {
        records: vec![(key.clone(), Record::new(Bytes::from_static(b"high"), 3, 2))],
    };

    call(data_addr, Channel::Data, FUNC_DATASTORE_SYNC, encode_payload(&low_owner)).await;
    call(data_addr, Channel::Data, FUNC_DATASTORE_SYNC, encode_payload(&high_owner)).await;

    let record = node.state.datastore.get(&key).unwrap();
    assert_eq!(record.value, Bytes::from_static(b"high"));

    // Replaying the lower-owner record at the same version must not win.
    call(data_addr, Channel::Data, FUNC_DATASTORE_SYNC, encode_payload(&low_owner)).await;
    let record = node.state.datastore.get(&key).unwrap();
    assert_eq!(record.value, Bytes::from_static(b"high"));
}
