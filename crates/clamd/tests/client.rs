use std::io::Cursor;
use std::sync::Arc;

use clamgate_clamd::mock::{MockBehavior, MockDaemon, EICAR};
use clamgate_clamd::{handle, ClamdClient, EngineVerdict};
use clamgate_core::Config;

async fn scan_bytes(client: &ClamdClient, payload: Vec<u8>) -> clamgate_clamd::EngineReply {
    let completion = client
        .scan_stream(Cursor::new(payload))
        .await
        .expect("connect to mock");
    completion
        .await
        .expect("session task finished")
        .expect("session succeeded")
}

/// All cases run in a single test because the shared handle is
/// process-global.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_against_mock_daemon() {
    // ── ping/pong ──
    let daemon = MockDaemon::spawn().await;
    let client = ClamdClient::new(daemon.socket());
    client.ping().await.expect("ping should succeed");

    // ── clean payload ──
    let reply = scan_bytes(&client, b"just some bytes".to_vec()).await;
    assert_eq!(reply.verdict, EngineVerdict::Clean);
    assert!(reply.description.is_empty());

    // ── infected payload, signature mid-stream ──
    let mut payload = vec![b'x'; 5000];
    payload.extend_from_slice(EICAR);
    payload.extend_from_slice(b"trailer");
    let reply = scan_bytes(&client, payload).await;
    assert_eq!(reply.verdict, EngineVerdict::Found);
    assert_eq!(reply.description, "Eicar-Test-Signature");

    // ── empty payload scans clean ──
    let reply = scan_bytes(&client, Vec::new()).await;
    assert_eq!(reply.verdict, EngineVerdict::Clean);

    // ── forced engine error ──
    let broken = MockDaemon::with_behavior(MockBehavior {
        forced_reply: Some("stream: Out of memory ERROR".to_string()),
        ..MockBehavior::default()
    })
    .await;
    let client = ClamdClient::new(broken.socket());
    let reply = scan_bytes(&client, b"anything".to_vec()).await;
    assert_eq!(reply.verdict, EngineVerdict::Error);
    assert_eq!(reply.description, "Out of memory");

    // ── dead socket ──
    let gone = MockDaemon::spawn().await;
    let path = gone.socket().to_path_buf();
    drop(gone);
    let client = ClamdClient::new(&path);
    assert!(client.ping().await.is_err());
    assert!(client.scan_stream(Cursor::new(Vec::new())).await.is_err());

    // ── shared handle: lazy init, reuse, reset ──
    let daemon = MockDaemon::spawn().await;
    let config = Config {
        socket: daemon.socket().to_path_buf(),
        ..Config::default()
    };
    let first = handle::get(&config);
    let second = handle::get(&config);
    assert!(Arc::ptr_eq(&first, &second));
    handle::ping(&config).await.expect("handle ping");

    handle::reset();
    let third = handle::get(&config);
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(third.socket(), daemon.socket());
}
