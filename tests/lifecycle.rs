//! Deadlines, cancellation, shutdown and per-call metadata.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::*;
use esdb_client::executor::CallExecutor;
use esdb_client::{CallOptions, Client, CommandError, ConnectionSettings, Credentials};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

const METHOD: &str = "/event_store.client.streams.Streams/Delete";

#[tokio::test(start_paused = true)]
async fn call_deadline_is_enforced() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond(&node("localhost"), UnaryAnswer::Hang);
    let executor = CallExecutor::new(Arc::clone(&transport), Arc::new(single_node_settings()));

    let options = CallOptions::default().deadline(Duration::from_secs(2));
    let err = executor
        .execute(METHOD, Bytes::new(), &options)
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::DeadlineExceeded));
    assert_eq!(transport.unary_calls(), 1);
    assert!(transport.calls()[0].grpc_timeout.is_some());
}

#[tokio::test(start_paused = true)]
async fn default_deadline_applies_when_call_sets_none() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond(&node("localhost"), UnaryAnswer::Hang);
    let settings = ConnectionSettings::builder()
        .single_node(node("localhost"))
        .tls(false)
        .default_deadline(Duration::from_millis(500))
        .build()
        .unwrap();
    let executor = CallExecutor::new(Arc::clone(&transport), Arc::new(settings));

    let started = tokio::time::Instant::now();
    let err = executor
        .execute(METHOD, Bytes::new(), &CallOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::DeadlineExceeded));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(500) && elapsed < Duration::from_millis(600));
}

#[tokio::test]
async fn no_deadline_sends_no_timeout_header() {
    let transport = Arc::new(FakeTransport::new());
    let executor = CallExecutor::new(Arc::clone(&transport), Arc::new(single_node_settings()));

    executor
        .execute(METHOD, Bytes::new(), &CallOptions::default())
        .await
        .unwrap();

    assert!(transport.calls()[0].grpc_timeout.is_none());
}

#[tokio::test(start_paused = true)]
async fn caller_cancellation_stops_the_call() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond(&node("localhost"), UnaryAnswer::Hang);
    let executor = CallExecutor::new(Arc::clone(&transport), Arc::new(single_node_settings()));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let options = CallOptions::default().cancellation(token);
    let err = executor
        .execute(METHOD, Bytes::new(), &options)
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::Cancelled));
    assert!(!executor.is_shut_down());
}

#[tokio::test]
async fn already_cancelled_token_issues_no_call() {
    let transport = Arc::new(FakeTransport::new());
    let executor = CallExecutor::new(Arc::clone(&transport), Arc::new(single_node_settings()));

    let token = CancellationToken::new();
    token.cancel();
    let err = executor
        .execute(METHOD, Bytes::new(), &CallOptions::default().cancellation(token))
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::Cancelled));
    assert_eq!(transport.unary_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn close_cancels_in_flight_and_later_calls() {
    let transport = FakeTransport::new();
    transport.respond(&node("localhost"), UnaryAnswer::Hang);
    let client = Arc::new(Client::with_transport(transport, single_node_settings()));

    let in_flight = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .executor()
                .execute(METHOD, Bytes::new(), &CallOptions::default())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.close().await;
    assert!(client.is_closed());

    let err = in_flight.await.unwrap().unwrap_err();
    assert!(matches!(err, CommandError::Cancelled));

    let err = client
        .executor()
        .execute(METHOD, Bytes::new(), &CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Cancelled));
    assert_eq!(client.executor().channels().current_generation().await, None);
}

#[tokio::test]
async fn default_credentials_are_sent_as_basic_auth() {
    let transport = Arc::new(FakeTransport::new());
    let settings = ConnectionSettings::builder()
        .single_node(node("localhost"))
        .tls(false)
        .default_credentials(Credentials::new("admin", "changeit"))
        .build()
        .unwrap();
    let executor = CallExecutor::new(Arc::clone(&transport), Arc::new(settings));

    executor
        .execute(METHOD, Bytes::new(), &CallOptions::default())
        .await
        .unwrap();
    executor
        .execute(
            METHOD,
            Bytes::new(),
            &CallOptions::default().credentials(Credentials::new("ops", "secret")),
        )
        .await
        .unwrap();

    let calls = transport.calls();
    assert_eq!(
        calls[0].authorization.as_deref(),
        Some("Basic YWRtaW46Y2hhbmdlaXQ=")
    );
    assert_eq!(calls[1].authorization.as_deref(), Some("Basic b3BzOnNlY3JldA=="));
}

#[tokio::test]
async fn no_credentials_sends_no_authorization() {
    let transport = Arc::new(FakeTransport::new());
    let executor = CallExecutor::new(Arc::clone(&transport), Arc::new(single_node_settings()));

    executor
        .execute(METHOD, Bytes::new(), &CallOptions::default())
        .await
        .unwrap();

    let call = &transport.calls()[0];
    assert!(call.authorization.is_none());
    // single-node default preference is `none`
    assert!(call.requires_leader.is_none());
}

#[tokio::test]
#[traced_test]
async fn credentials_never_reach_the_logs() {
    let transport = FakeTransport::new();
    transport.gossip(&node("nodeA"), GossipAnswer::Members(three_node_cluster()));
    let settings = cluster_settings(&["nodeA"])
        .default_credentials(Credentials::new("admin", "hunter2-secret"))
        .build()
        .unwrap();
    tracing::info!(?settings, "settings");
    let client = Client::with_transport(transport, settings);

    client
        .executor()
        .execute(
            METHOD,
            Bytes::new(),
            &CallOptions::default().credentials(Credentials::new("ops", "other-secret")),
        )
        .await
        .unwrap();

    assert!(logs_contain("channel built"));
    assert!(!logs_contain("hunter2-secret"));
    assert!(!logs_contain("other-secret"));
}
