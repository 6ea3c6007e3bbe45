//! End-to-end tests against [`MeshEngine`] wired through an in-memory
//! [`MeshTransport`] instead of real BLE hardware. Each node gets its own
//! temp-file `Store` and a "wire" address; a shared [`Wire`] routes
//! `send_to`/`send_to_all` calls between the fake transports the same way
//! BLE notifications would.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::mpsc;

use bigheads_core::mesh::{EncMode, Envelope, Frame, Event, MeshEngine, MeshEngineConfig};
use bigheads_core::transport::{MeshTransport, TransportEvent};
use bigheads_core::Store;

struct Wire {
    inboxes: SyncMutex<HashMap<String, mpsc::Sender<TransportEvent>>>,
}

impl Wire {
    fn new() -> Arc<Self> {
        Arc::new(Self { inboxes: SyncMutex::new(HashMap::new()) })
    }
}

struct FakeTransport {
    own_address: String,
    wire: Arc<Wire>,
    connected: SyncMutex<Vec<String>>,
}

impl FakeTransport {
    fn link(&self, peer_address: &str) {
        self.connected.lock().push(peer_address.to_string());
    }
}

#[async_trait]
impl MeshTransport for FakeTransport {
    async fn send_to(&self, address: &str, packet: &[u8]) -> bool {
        let maybe_tx = self.wire.inboxes.lock().get(address).cloned();
        let Some(tx) = maybe_tx else { return false };
        tx.send(TransportEvent::PacketReceived {
            address: self.own_address.clone(),
            data: packet.to_vec(),
        })
        .await
        .is_ok()
    }

    async fn send_to_all(&self, packet: &[u8]) {
        let peers = self.connected.lock().clone();
        for addr in peers {
            self.send_to(&addr, packet).await;
        }
    }

    fn connected_addresses(&self) -> Vec<String> {
        self.connected.lock().clone()
    }
}

struct Node {
    engine: Arc<MeshEngine>,
    events: mpsc::Receiver<Event>,
    transport: Arc<FakeTransport>,
    _db_dir: tempfile::TempDir,
}

fn spawn_node(node_id: &str, wire: &Arc<Wire>, passphrase: &str, default_ttl: u32) -> Node {
    let db_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(&db_dir.path().join("node.db"), 256).unwrap());

    let transport = Arc::new(FakeTransport {
        own_address: node_id.to_string(),
        wire: Arc::clone(wire),
        connected: SyncMutex::new(Vec::new()),
    });

    let (transport_tx, mut transport_rx) = mpsc::channel(256);
    wire.inboxes.lock().insert(node_id.to_string(), transport_tx);

    let (event_tx, event_rx) = mpsc::channel(256);
    let engine = MeshEngine::new(
        MeshEngineConfig {
            node_id: node_id.to_string(),
            packet_size_limit: 500,
            default_ttl,
            max_file_bytes: 1 << 20,
        },
        store,
        Arc::clone(&transport) as Arc<dyn MeshTransport>,
        passphrase,
        event_tx,
    );

    let bridge_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        while let Some(event) = transport_rx.recv().await {
            bridge_engine.handle_transport_event(event).await;
        }
    });

    Node { engine, events: event_rx, transport, _db_dir: db_dir }
}

async fn recv_matching<F: Fn(&Event) -> bool>(node: &mut Node, pred: F) -> Event {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = node.events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for expected event")
}

async fn expect_silence(node: &mut Node) {
    let result = tokio::time::timeout(Duration::from_millis(150), node.events.recv()).await;
    assert!(result.is_err(), "expected no events, got {result:?}");
}

#[tokio::test]
async fn duplicate_broadcast_is_suppressed() {
    let wire = Wire::new();
    let mut node = spawn_node("solo", &wire, "passphrase", 3);

    let env = Envelope {
        msg_id: "dup-1".to_string(),
        from: "peer-z".to_string(),
        to: "*".to_string(),
        ttl: 3,
        hop: 0,
        timestamp: 0.0,
        msg_type: "text".to_string(),
        enc: EncMode::None,
        payload: serde_json::json!("hi"),
        reply_to: None,
    };
    let raw = serde_json::to_vec(&Frame::Mesh { env }).unwrap();

    node.engine
        .handle_transport_event(TransportEvent::PacketReceived {
            address: "peer-z".to_string(),
            data: raw.clone(),
        })
        .await;
    node.engine
        .handle_transport_event(TransportEvent::PacketReceived { address: "peer-z".to_string(), data: raw })
        .await;

    let _first = recv_matching(&mut node, |e| matches!(e, Event::Message { .. })).await;
    expect_silence(&mut node).await;
}

#[tokio::test]
async fn ttl_exhaustion_stops_the_flood_one_hop_out() {
    let wire = Wire::new();
    let mut a = spawn_node("A", &wire, "shared-pass", 1);
    let mut b = spawn_node("B", &wire, "shared-pass", 1);
    let mut c = spawn_node("C", &wire, "shared-pass", 1);

    a.transport.link("B");
    b.transport.link("A");
    b.transport.link("C");
    c.transport.link("B");

    a.engine.send_text("*", "one hop only", None).await.unwrap();

    let _ = recv_matching(&mut b, |e| matches!(e, Event::Message { .. })).await;
    expect_silence(&mut c).await;
}

#[tokio::test]
async fn ttl_two_reaches_the_second_hop() {
    let wire = Wire::new();
    let mut a = spawn_node("A", &wire, "shared-pass", 2);
    let mut b = spawn_node("B", &wire, "shared-pass", 2);
    let mut c = spawn_node("C", &wire, "shared-pass", 2);

    a.transport.link("B");
    b.transport.link("A");
    b.transport.link("C");
    c.transport.link("B");

    a.engine.send_text("*", "two hops", None).await.unwrap();

    let _ = recv_matching(&mut b, |e| matches!(e, Event::Message { .. })).await;
    let via_c = recv_matching(&mut c, |e| matches!(e, Event::Message { .. })).await;
    match via_c {
        Event::Message { env } => assert_eq!(env.hop, 1),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn group_passphrase_rotation_locks_out_stale_members() {
    let wire = Wire::new();
    let mut a = spawn_node("A", &wire, "v1-pass", 4);
    let mut rotated = spawn_node("rotated", &wire, "v1-pass", 4);
    let mut stale = spawn_node("stale", &wire, "v1-pass", 4);

    a.transport.link("rotated");
    a.transport.link("stale");

    a.engine.send_text("*", "on v1", None).await.unwrap();
    recv_matching(&mut rotated, |e| matches!(e, Event::Message { .. })).await;
    recv_matching(&mut stale, |e| matches!(e, Event::Message { .. })).await;

    a.engine.update_group_passphrase("v2-pass");
    rotated.engine.update_group_passphrase("v2-pass");

    a.engine.send_text("*", "on v2", None).await.unwrap();
    let event = recv_matching(&mut rotated, |e| matches!(e, Event::Message { .. })).await;
    match event {
        Event::Message { env } => assert_eq!(env.payload, serde_json::json!({"text": "on v2"})),
        _ => unreachable!(),
    }
    expect_silence(&mut stale).await;
}

#[tokio::test]
async fn private_session_handshake_then_encrypted_delivery() {
    let wire = Wire::new();
    let mut a = spawn_node("A", &wire, "shared-pass", 4);
    let mut b = spawn_node("B", &wire, "shared-pass", 4);
    a.transport.link("B");
    b.transport.link("A");

    // Both sides beacon once so each learns the other's wire address.
    a.engine
        .send_system("*", serde_json::json!({"kind": "hello", "node_id": "A", "ts": 0.0}), true)
        .await
        .unwrap();
    b.engine
        .send_system("*", serde_json::json!({"kind": "hello", "node_id": "B", "ts": 0.0}), true)
        .await
        .unwrap();
    recv_matching(&mut b, |e| matches!(e, Event::PeerHello { .. })).await;
    recv_matching(&mut a, |e| matches!(e, Event::PeerHello { .. })).await;

    a.engine.start_private_chat("B").await;
    // noise_init -> noise_resp round trip completes as each side's event
    // loop drains the handshake envelopes; give both a moment to settle.
    tokio::time::sleep(Duration::from_millis(50)).await;

    a.engine.send_text("B", "secret hi", None).await.unwrap();

    let event = recv_matching(&mut b, |e| match e {
        Event::Message { env } => env.msg_type == "text",
        _ => false,
    })
    .await;
    match event {
        Event::Message { env } => {
            assert_eq!(env.from, "A");
            assert_eq!(env.payload, serde_json::json!({"text": "secret hi"}));
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn oversized_broadcast_is_fragmented_and_reassembled() {
    let wire = Wire::new();
    let mut a = spawn_node("A", &wire, "shared-pass", 3);
    let mut b = spawn_node("B", &wire, "shared-pass", 3);
    a.transport.link("B");
    b.transport.link("A");

    let long_text: String = "x".repeat(2000);
    a.engine.send_text("*", &long_text, None).await.unwrap();

    let event = recv_matching(&mut b, |e| matches!(e, Event::Message { .. })).await;
    match event {
        Event::Message { env } => {
            let text = env.payload.get("text").and_then(|v| v.as_str()).unwrap();
            assert_eq!(text, long_text);
        }
        _ => unreachable!(),
    }
}
