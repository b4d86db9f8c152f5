// tests/integration/single_node_datastore.rs
//
// S1: single-node SET/GET/UNSET over the ingress channel.

use crate::common::{TestNode, call, test_config};
use bytes::Bytes;
use ridgedb::errors::StatusCode;
use ridgedb::node::handlers::{GetRequest, GetResponse, SetRequest, UnsetRequest};
use ridgedb::rpc::frame::Channel;
use ridgedb::rpc::{FUNC_DATASTORE_GET, FUNC_DATASTORE_SET, FUNC_DATASTORE_UNSET, decode_payload, encode_payload};

#[tokio::test]
async fn set_get_unset_round_trips_on_ingress() {
    let node = TestNode::spawn(test_config(1, vec![], false)).await;
    let ingress_addr = node.state.config.ports.ingress_addr.unwrap();

    let set_payload = encode_payload(&SetRequest {
        key: Bytes::from_static(b"greeting"),
        value: Bytes::from_static(b"hello"),
    });
    let (status, _) = call(ingress_addr, Channel::Ingress, FUNC_DATASTORE_SET, set_payload).await;
    assert_eq!(status, StatusCode::Ok as u8);

    let get_payload = encode_payload(&GetRequest { key: Bytes::from_static(b"greeting") });
    let (status, body) = call(ingress_addr, Channel::Ingress, FUNC_DATASTORE_GET, get_payload).await;
    assert_eq!(status, StatusCode::Ok as u8);
    let response: GetResponse = decode_payload(&body).unwrap();
    assert!(response.found);
    assert_eq!(response.value, Bytes::from_static(b"hello"));

    let unset_payload = encode_payload(&UnsetRequest { key: Bytes::from_static(b"greeting") });
    let (status, _) = call(ingress_addr, Channel::Ingress, FUNC_DATASTORE_UNSET, unset_payload).await;
    assert_eq!(status, StatusCode::Ok as u8);

    let get_payload = encode_payload(&GetRequest { key: Bytes::from_static(b"greeting") });
    let (status, body) = call(ingress_addr, Channel::Ingress, FUNC_DATASTORE_GET, get_payload).await;
    assert_eq!(status, StatusCode::Ok as u8);
    let response: GetResponse = decode_payload(&body).unwrap();
    assert!(!response.found);
}

#[tokio::test]
async fn get_of_missing_key_reports_found_false() {
    let node = TestNode::spawn(test_config(2, vec![], false)).await;
    let ingress_addr = node.state.config.ports.ingress_addr.unwrap();

    let get_payload = encode_payload(&GetRequest { key: Bytes::from_static(b"missing") });
    let (status, body) = call(ingress_addr, Channel::Ingress, FUNC_DATASTORE_GET, get_payload).await;
    assert_eq!(status, StatusCode::Ok as u8);
    let response: GetResponse = decode_payload(&body).unwrap();
    assert!(!response.found);
    assert_eq!(response.value, Bytes::new());
}

#[tokio::test]
async fn cluster_internal_func_ids_are_rejected_on_ingress() {
    let node = TestNode::spawn(test_config(3, vec![], false)).await;
    let ingress_addr = node.state.config.ports.ingress_addr.unwrap();

    let (status, _) = call(
        ingress_addr,
        Channel::Ingress,
        ridgedb::rpc::FUNC_CLUSTER_JOIN,
        Bytes::new(),
    )
    .await;
    assert_eq!(status, StatusCode::Invalid as u8);
}
