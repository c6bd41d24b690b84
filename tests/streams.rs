//! `delete_stream` through the full call path.

mod common;

use bytes::Bytes;
use common::*;
use esdb_client::streams::{proto, DELETE_METHOD};
use esdb_client::{
    CallOptions, Client, CommandError, Credentials, DeleteStreamOptions, ExpectedRevision,
    Position, StreamsClient,
};
use prost::Message;

fn position_response(commit: u64, prepare: u64) -> Bytes {
    Bytes::from(
        proto::DeleteResp {
            position_option: Some(proto::DeletePosition::Position(proto::Position {
                commit_position: commit,
                prepare_position: prepare,
            })),
        }
        .encode_to_vec(),
    )
}

#[tokio::test]
async fn delete_stream_round_trip() {
    let transport = FakeTransport::new();
    transport.respond(&node("localhost"), UnaryAnswer::Ok(position_response(1_024, 1_000)));
    let client = Client::with_transport(transport, single_node_settings());

    let options = DeleteStreamOptions::default().expected_revision(ExpectedRevision::Exact(7));
    let result = client.delete_stream("orders-17", &options).await.unwrap();

    assert_eq!(
        result.position,
        Some(Position {
            commit: 1_024,
            prepare: 1_000
        })
    );
}

#[tokio::test]
async fn delete_stream_sends_encoded_request() {
    let transport = std::sync::Arc::new(FakeTransport::new());
    let executor = esdb_client::executor::CallExecutor::new(
        std::sync::Arc::clone(&transport),
        std::sync::Arc::new(single_node_settings()),
    );
    let body = esdb_client::streams::encode_delete_request("orders-17", ExpectedRevision::NoStream);
    executor
        .execute(DELETE_METHOD, body, &CallOptions::default())
        .await
        .unwrap();

    let call = &transport.calls()[0];
    assert_eq!(call.method, "/event_store.client.streams.Streams/Delete");
    let sent = proto::DeleteReq::decode(call.body.clone())
        .unwrap()
        .options
        .unwrap();
    assert_eq!(sent.stream_identifier.unwrap().stream_name, b"orders-17");
    assert!(matches!(
        sent.expected_stream_revision,
        Some(proto::ExpectedStreamRevision::NoStream(_))
    ));
}

#[tokio::test]
async fn delete_without_position() {
    let transport = FakeTransport::new();
    let client = Client::with_transport(transport, single_node_settings());

    let result = client
        .delete_stream("orders-17", &DeleteStreamOptions::default())
        .await
        .unwrap();
    assert_eq!(result.position, None);
}

#[tokio::test]
async fn wrong_expected_version_reaches_caller() {
    let transport = FakeTransport::new();
    transport.respond(
        &node("localhost"),
        UnaryAnswer::Fail(wrong_expected_version("orders-17", "7", "9")),
    );
    let client = Client::with_transport(transport, single_node_settings());

    let options = DeleteStreamOptions::default().expected_revision(ExpectedRevision::Exact(7));
    let err = client.delete_stream("orders-17", &options).await.unwrap_err();

    match err {
        CommandError::WrongExpectedVersion {
            stream,
            expected,
            actual,
        } => {
            assert_eq!(stream, "orders-17");
            assert_eq!(expected, "7");
            assert_eq!(actual, "9");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(client.executor().channels().builds(), 1);
}

#[tokio::test]
async fn delete_in_cluster_follows_leader_and_uses_call_credentials() {
    let transport = FakeTransport::new();
    transport
        .gossip(&node("nodeA"), GossipAnswer::Members(three_node_cluster()))
        .respond_once(
            &node("nodeB"),
            UnaryAnswer::Fail(not_leader(Some(&node("nodeA")))),
        )
        .respond(&node("nodeA"), UnaryAnswer::Ok(position_response(5, 5)));
    let settings = cluster_settings(&["nodeA", "nodeB", "nodeC"]).build().unwrap();
    let client = Client::with_transport(transport, settings);

    let options = DeleteStreamOptions::default().call_options(
        CallOptions::default().credentials(Credentials::new("admin", "changeit")),
    );
    let result = client.delete_stream("orders-17", &options).await.unwrap();

    assert_eq!(result.position, Some(Position { commit: 5, prepare: 5 }));
    let members = client.cluster_members().await.unwrap();
    let leaders: Vec<_> = members
        .iter()
        .filter(|m| m.role == esdb_client::MemberRole::Leader)
        .map(|m| m.endpoint.host.as_str())
        .collect();
    assert_eq!(leaders, vec!["nodeA"]);
}

#[tokio::test]
async fn closed_client_rejects_delete() {
    let transport = FakeTransport::new();
    let client = Client::with_transport(transport, single_node_settings());
    client.close().await;

    let err = client
        .delete_stream("orders-17", &DeleteStreamOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Cancelled));
}
