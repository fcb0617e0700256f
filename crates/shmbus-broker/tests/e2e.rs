//! End-to-end tests over real TCP connections.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::net::SocketAddr;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use shmbus_broker::config::BrokerConfig;
use shmbus_broker::transport::{serve_connection, Locality};
use shmbus_broker::{Broker, BrokerState};
use shmbus_core::protocol::{Action, BinaryCodec, Codec, CodecKind, Envelope, Status, TextCodec};

use common::{test_config, TestClient};

async fn start_broker(dir: &std::path::Path) -> (SocketAddr, JoinHandle<()>) {
    start_broker_with(test_config(dir)).await
}

async fn start_broker_with(cfg: BrokerConfig) -> (SocketAddr, JoinHandle<()>) {
    let broker = Broker::bind(cfg).await.unwrap();
    let addr = broker.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        broker.run().await.unwrap();
    });
    (addr, handle)
}

fn req(action: Action, channel: Option<&str>, payload: Value) -> Envelope {
    Envelope::request(action, channel, payload)
}

#[tokio::test]
async fn local_publish_goes_through_shared_memory() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, broker) = start_broker(dir.path()).await;

    // loopback peers are local: binary codec
    let mut sub = TestClient::connect(addr, CodecKind::Binary).await;
    let mut publisher = TestClient::connect(addr, CodecKind::Binary).await;

    let resp = publisher.request(&req(Action::EnableSharedMemory, None, Value::Null)).await;
    assert_eq!(resp.status, Status::Ok);
    publisher.request(&req(Action::CreateChannel, Some("t"), Value::Null)).await;

    let resp = sub.request(&req(Action::Subscribe, Some("t"), Value::Null)).await;
    assert_eq!(resp.payload, json!("subscribed to t"));

    let resp = publisher.request(&req(Action::Send, Some("t"), json!("hello"))).await;
    assert_eq!(resp.payload, json!("message sent to t"));

    let note = sub.recv().await.unwrap();
    assert_eq!(note.action, Action::Notification);
    assert_eq!(note.payload, json!({ "message_location": "shared_memory" }));

    // a subscribed connection can still issue requests
    let resp = sub.request(&req(Action::ReadSharedMemory, None, Value::Null)).await;
    assert_eq!(resp.payload, json!("hello"));

    let resp = publisher.request(&req(Action::Stop, None, Value::Null)).await;
    assert_eq!(resp.payload, json!("broker stopped"));

    timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
    assert!(!dir.path().join("test_shared_mem").exists());
}

/// Serve every loopback connection as a remote peer.
async fn start_remote(cfg: BrokerConfig) -> SocketAddr {
    let state = BrokerState::new(cfg).unwrap();

    // classify by hand: loopback would otherwise count as local
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, peer) = listener.accept().await.unwrap();
            tokio::spawn(serve_connection(state.clone(), stream, peer, Locality::Remote));
        }
    });
    addr
}

#[tokio::test]
async fn remote_peer_speaks_json_with_the_same_framing() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_remote(test_config(dir.path())).await;

    let mut sub = TestClient::connect(addr, CodecKind::Text).await;
    let mut publisher = TestClient::connect(addr, CodecKind::Text).await;

    publisher.request(&req(Action::CreateChannel, Some("t"), Value::Null)).await;
    sub.request(&req(Action::Subscribe, Some("t"), Value::Null)).await;

    let resp = publisher.request(&req(Action::Send, Some("t"), json!("hello"))).await;
    assert_eq!(resp.status, Status::Ok);

    let note = sub.recv().await.unwrap();
    assert_eq!(note.payload, json!("hello"));

    // legacy field names are accepted from remote clients
    publisher
        .send_raw(br#"{"action":"SEND","channel":"t","time":"2024-01-01 00:00:00","message":"again"}"#)
        .await;
    assert_eq!(publisher.recv().await.unwrap().status, Status::Ok);
    assert_eq!(sub.recv().await.unwrap().payload, json!("again"));

    let resp = publisher.request(&req(Action::Unknown("NOPE".into()), None, Value::Null)).await;
    assert_eq!(resp.payload, json!("unknown command"));

    // still open after an unknown command
    let resp = publisher.request(&req(Action::GetMessages, Some("t"), Value::Null)).await;
    assert_eq!(resp.payload.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn malformed_frame_closes_only_that_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, broker) = start_broker(dir.path()).await;

    let mut bad = TestClient::connect(addr, CodecKind::Binary).await;
    let mut good = TestClient::connect(addr, CodecKind::Binary).await;

    bad.send_raw(b"\xff\xff\xff\xff garbage").await;
    assert!(bad.recv().await.is_none());

    let resp = good.request(&req(Action::CreateChannel, Some("t"), Value::Null)).await;
    assert_eq!(resp.status, Status::Ok);

    good.request(&req(Action::Stop, None, Value::Null)).await;
    timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
}

#[tokio::test]
async fn closed_subscriber_is_dropped_from_channel() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Broker::bind(test_config(dir.path())).await.unwrap();
    let addr = broker.local_addr().unwrap();
    let state = broker.state();
    let stop = broker.shutdown_handle();
    let handle = tokio::spawn(async move { broker.run().await.unwrap() });

    let mut publisher = TestClient::connect(addr, CodecKind::Binary).await;
    publisher.request(&req(Action::CreateChannel, Some("t"), Value::Null)).await;

    {
        let mut sub = TestClient::connect(addr, CodecKind::Binary).await;
        sub.request(&req(Action::Subscribe, Some("t"), Value::Null)).await;
        assert_eq!(state.registry().subscriber_ids("t").len(), 1);
    }

    // disconnect is observed asynchronously
    let registry = state.registry();
    timeout(Duration::from_secs(5), async {
        while !registry.subscriber_ids("t").is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    stop.cancel();
    timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut cfg = test_config(dir.path());
    cfg.broker.listen = taken.local_addr().unwrap().to_string();

    let err = Broker::bind(cfg).await.err().expect("port is taken");
    assert_eq!(err.client_code().as_str(), "INTERNAL");
}

#[tokio::test]
async fn oversize_inbound_frame_closes_only_that_connection() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.broker.max_frame_bytes = 1024;
    let (addr, broker) = start_broker_with(cfg).await;

    let mut big = TestClient::connect(addr, CodecKind::Binary).await;
    let mut good = TestClient::connect(addr, CodecKind::Binary).await;

    big.send_raw(&vec![0u8; 2048]).await;
    assert!(big.recv().await.is_none());

    let resp = good.request(&req(Action::CreateChannel, Some("t"), Value::Null)).await;
    assert_eq!(resp.status, Status::Ok);

    good.request(&req(Action::Stop, None, Value::Null)).await;
    timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
}

/// Largest text payload whose SEND request still fits in `limit` bytes.
fn send_that_just_fits(limit: usize) -> Envelope {
    let mut n = limit;
    loop {
        let env = req(Action::Send, Some("t"), json!("x".repeat(n)));
        if TextCodec.encode(&env).unwrap().len() <= limit {
            return env;
        }
        n -= 1;
    }
}

#[tokio::test]
async fn oversize_notification_keeps_the_subscriber_connected() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.broker.max_frame_bytes = 1024;
    let addr = start_remote(cfg).await;

    let mut sub = TestClient::connect(addr, CodecKind::Text).await;
    let mut publisher = TestClient::connect(addr, CodecKind::Text).await;
    publisher.request(&req(Action::CreateChannel, Some("t"), Value::Null)).await;
    sub.request(&req(Action::Subscribe, Some("t"), Value::Null)).await;

    // the request fits; the notification adds an id and a timestamp and does not
    let resp = publisher.request(&send_that_just_fits(1024)).await;
    assert_eq!(resp.payload, json!("message sent to t"));

    // nothing was queued for the subscriber: its next frame is this response
    let resp = sub.request(&req(Action::CreateChannel, Some("u"), Value::Null)).await;
    assert_eq!(resp.action, Action::Response);
    assert_eq!(resp.payload, json!("channel u created"));

    publisher.request(&req(Action::Send, Some("t"), json!("small"))).await;
    let note = sub.recv().await.unwrap();
    assert_eq!(note.action, Action::Notification);
    assert_eq!(note.payload, json!("small"));
}

#[tokio::test]
async fn oversize_response_is_answered_with_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.broker.max_frame_bytes = 1024;
    let addr = start_remote(cfg).await;

    let mut client = TestClient::connect(addr, CodecKind::Text).await;
    client.request(&req(Action::CreateChannel, Some("t"), Value::Null)).await;
    for i in 0..10 {
        let resp = client.request(&req(Action::Send, Some("t"), json!(format!("{i:0>100}")))).await;
        assert_eq!(resp.status, Status::Ok);
    }

    let resp = client.request(&req(Action::GetMessages, Some("t"), Value::Null)).await;
    assert!(resp.is_error());
    assert_eq!(resp.payload["code"], "PAYLOAD_TOO_LARGE");

    // still open; a response that fits goes through
    let resp = client.request(&req(Action::GetMessage, Some("t"), Value::Null)).await;
    assert_eq!(resp.status, Status::Ok);
    assert_eq!(resp.payload["payload"], json!(format!("{:0>100}", 9)));
}

#[tokio::test]
async fn deeply_nested_binary_frame_does_not_take_the_broker_down() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, broker) = start_broker(dir.path()).await;

    let mut bad = TestClient::connect(addr, CodecKind::Binary).await;
    let mut good = TestClient::connect(addr, CodecKind::Binary).await;

    let env = req(Action::Send, Some("t"), Value::Null);
    let mut frame = BinaryCodec.encode(&env).unwrap().to_vec();
    frame.truncate(frame.len() - 4); // Null payload tag
    for _ in 0..80_000 {
        frame.extend_from_slice(&6u32.to_le_bytes()); // Array
        frame.extend_from_slice(&1u64.to_le_bytes()); // of one
    }
    frame.extend_from_slice(&0u32.to_le_bytes());

    bad.send_raw(&frame).await;
    assert!(bad.recv().await.is_none());

    let resp = good.request(&req(Action::CreateChannel, Some("t"), Value::Null)).await;
    assert_eq!(resp.status, Status::Ok);

    good.request(&req(Action::Stop, None, Value::Null)).await;
    timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
}
