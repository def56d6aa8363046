// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for the two-party call flow over a live relay.
//!
//! Each test starts a real relay on an OS-assigned port and drives it with
//! `tokio-tungstenite` clients speaking the JSON protocol. These tests
//! validate:
//! - Roster broadcasts on join and on disconnect, in join order
//! - Offer / answer / reject / candidate / hang-up forwarding with the sender
//!   id rewritten to the authenticated connection
//! - Messages for absent peers vanish without any reply
//! - Binary frames are ignored; an oversized frame ends the connection
//! - The static client bundle is served next to the WebSocket endpoint

use std::sync::Arc;
use std::time::Duration;

use callroom_proto::participant::{ConnectionId, Participant};
use callroom_proto::signal::{self, ClientMessage, Descriptor, ServerMessage};
use callroom_relay::relay::{self, RelayState};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite;

type ClientWs =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// How long to wait before concluding that no message is coming.
const SILENCE: Duration = Duration::from_millis(200);

/// A test client: its socket plus the id the server assigned it.
struct Client {
    ws: ClientWs,
    id: ConnectionId,
}

impl Client {
    /// Connects to the relay and consumes the `connected` greeting.
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let url = format!("ws://{addr}/ws");
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let id = match recv(&mut ws).await {
            ServerMessage::Connected { id } => id,
            other => panic!("expected Connected, got {other:?}"),
        };
        Self { ws, id }
    }

    async fn send(&mut self, msg: &ClientMessage) {
        let text = signal::encode(msg).unwrap();
        self.ws
            .send(tungstenite::Message::Text(text.into()))
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(5), recv(&mut self.ws))
            .await
            .expect("timed out waiting for message")
    }

    /// Asserts that nothing arrives within [`SILENCE`].
    async fn expect_silence(&mut self) {
        if let Ok(Some(Ok(frame))) = tokio::time::timeout(SILENCE, self.ws.next()).await {
            panic!("expected silence, got {frame:?}");
        }
    }

    async fn join(&mut self, name: &str) {
        self.send(&ClientMessage::JoinRoom {
            display_name: name.to_string(),
        })
        .await;
    }

    async fn roster(&mut self) -> Vec<Participant> {
        match self.recv().await {
            ServerMessage::RosterUpdate { users } => users,
            other => panic!("expected RosterUpdate, got {other:?}"),
        }
    }
}

async fn recv(ws: &mut ClientWs) -> ServerMessage {
    loop {
        let frame = ws.next().await.unwrap().unwrap();
        if let tungstenite::Message::Text(text) = frame {
            return signal::decode(text.as_str()).unwrap();
        }
    }
}

fn blob(text: &str) -> Descriptor {
    Descriptor::parse(text).unwrap()
}

fn entry(id: &ConnectionId, name: &str) -> Participant {
    Participant {
        id: id.clone(),
        name: name.to_string(),
    }
}

async fn start() -> std::net::SocketAddr {
    let (addr, _handle) = relay::start_server("127.0.0.1:0").await.unwrap();
    addr
}

#[tokio::test]
async fn alice_calls_bob_end_to_end() {
    let addr = start().await;

    let mut alice = Client::connect(addr).await;
    alice.join("Alice").await;
    assert_eq!(alice.roster().await, [entry(&alice.id, "Alice")]);

    let mut bob = Client::connect(addr).await;
    bob.join("Bob").await;
    let expected = [entry(&alice.id, "Alice"), entry(&bob.id, "Bob")];
    assert_eq!(alice.roster().await, expected);
    assert_eq!(bob.roster().await, expected);

    // Offer.
    alice
        .send(&ClientMessage::CallOffer {
            to: bob.id.clone(),
            from: Some(alice.id.clone()),
            display_name: "Alice".into(),
            offer: blob(r#"{"type":"offer","sdp":"X"}"#),
        })
        .await;
    assert_eq!(
        bob.recv().await,
        ServerMessage::IncomingCall {
            from: alice.id.clone(),
            display_name: "Alice".into(),
            offer: blob(r#"{"type":"offer","sdp":"X"}"#),
        }
    );

    // Answer.
    bob.send(&ClientMessage::CallAccepted {
        to: alice.id.clone(),
        from: Some(bob.id.clone()),
        answer: blob(r#"{"type":"answer","sdp":"Y"}"#),
    })
    .await;
    assert_eq!(
        alice.recv().await,
        ServerMessage::CallAccepted {
            from: bob.id.clone(),
            answer: blob(r#"{"type":"answer","sdp":"Y"}"#),
        }
    );

    // Candidates flow both ways.
    alice
        .send(&ClientMessage::IceCandidate {
            to: bob.id.clone(),
            candidate: blob(r#"{"candidate":"a-1"}"#),
        })
        .await;
    bob.send(&ClientMessage::IceCandidate {
        to: alice.id.clone(),
        candidate: blob(r#"{"candidate":"b-1"}"#),
    })
    .await;
    assert_eq!(
        bob.recv().await,
        ServerMessage::RemoteIceCandidate {
            candidate: blob(r#"{"candidate":"a-1"}"#)
        }
    );
    assert_eq!(
        alice.recv().await,
        ServerMessage::RemoteIceCandidate {
            candidate: blob(r#"{"candidate":"b-1"}"#)
        }
    );

    // Alice drops; Bob sees the shrunken roster.
    let bob_id = bob.id.clone();
    drop(alice);
    assert_eq!(bob.roster().await, [entry(&bob_id, "Bob")]);
}

#[tokio::test]
async fn rejected_call_reaches_caller() {
    let addr = start().await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;

    bob.send(&ClientMessage::CallRejected {
        to: alice.id.clone(),
        from: None,
    })
    .await;
    assert_eq!(
        alice.recv().await,
        ServerMessage::CallRejected {
            from: bob.id.clone()
        }
    );
}

#[tokio::test]
async fn hang_up_has_no_payload() {
    let addr = start().await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;

    alice
        .send(&ClientMessage::HangUp {
            to: bob.id.clone(),
            from: Some(alice.id.clone()),
        })
        .await;

    let frame = tokio::time::timeout(Duration::from_secs(5), bob.ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(value, json!({ "event": "hang-up" }));

    // The sender gets nothing back.
    alice.expect_silence().await;
}

#[tokio::test]
async fn spoofed_sender_is_rewritten() {
    let addr = start().await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;
    let carol = Client::connect(addr).await;

    alice
        .send(&ClientMessage::CallAccepted {
            to: bob.id.clone(),
            from: Some(carol.id.clone()),
            answer: blob(r#""Y""#),
        })
        .await;
    match bob.recv().await {
        ServerMessage::CallAccepted { from, .. } => assert_eq!(from, alice.id),
        other => panic!("expected CallAccepted, got {other:?}"),
    }
}

#[tokio::test]
async fn messages_to_absent_peer_vanish() {
    let addr = start().await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;
    let ghost = ConnectionId::from("no-such-connection");

    alice
        .send(&ClientMessage::CallOffer {
            to: ghost.clone(),
            from: None,
            display_name: "Alice".into(),
            offer: blob(r#""X""#),
        })
        .await;
    alice
        .send(&ClientMessage::IceCandidate {
            to: ghost.clone(),
            candidate: blob(r#""c""#),
        })
        .await;
    alice
        .send(&ClientMessage::HangUp {
            to: ghost,
            from: None,
        })
        .await;

    alice.expect_silence().await;
    bob.expect_silence().await;
}

#[tokio::test]
async fn message_to_departed_peer_vanishes() {
    let addr = start().await;
    let mut alice = Client::connect(addr).await;
    let bob = Client::connect(addr).await;
    let bob_id = bob.id.clone();
    drop(bob);

    // Give the server a moment to notice the close.
    tokio::time::sleep(Duration::from_millis(100)).await;

    alice
        .send(&ClientMessage::HangUp {
            to: bob_id,
            from: None,
        })
        .await;
    alice.expect_silence().await;
}

#[tokio::test]
async fn blank_join_is_ignored() {
    let addr = start().await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;

    alice.join("   ").await;
    alice.expect_silence().await;
    bob.expect_silence().await;

    alice.join("Alice").await;
    assert_eq!(bob.roster().await, [entry(&alice.id, "Alice")]);
}

#[tokio::test]
async fn descriptors_are_relayed_verbatim() {
    let addr = start().await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;

    // Unsorted keys, a wide integer, and `data` ahead of `event`.
    let offer = r#"{"type":"offer","sdp":"v=0\r\n","ts":18446744073709551616123,"q":1.50}"#;
    let frame = format!(
        r#"{{"data":{{"to":"{}","displayName":"Alice","offer":{offer}}},"event":"call-offer"}}"#,
        bob.id
    );
    alice
        .ws
        .send(tungstenite::Message::Text(frame.into()))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), bob.ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        received.to_text().unwrap(),
        format!(
            r#"{{"event":"incoming-call","data":{{"from":"{}","displayName":"Alice","offer":{offer}}}}}"#,
            alice.id
        )
    );
}

#[tokio::test]
async fn binary_ignored_and_oversized_frame_disconnects() {
    let (addr, _handle) = relay::start_server_with_state(
        "127.0.0.1:0",
        Arc::new(RelayState::with_config(1024)),
        std::path::Path::new("public"),
    )
    .await
    .unwrap();

    let mut alice = Client::connect(addr).await;
    alice.join("Alice").await;
    alice.roster().await;
    let mut bob = Client::connect(addr).await;
    bob.join("Bob").await;
    alice.roster().await;
    bob.roster().await;

    alice
        .ws
        .send(tungstenite::Message::Binary(vec![0xde, 0xad, 0xbe, 0xef].into()))
        .await
        .unwrap();
    bob.expect_silence().await;

    // Alice is still connected and joined after the binary frame.
    alice.join("Alice2").await;
    let expected = [entry(&alice.id, "Alice2"), entry(&bob.id, "Bob")];
    assert_eq!(alice.roster().await, expected);
    assert_eq!(bob.roster().await, expected);

    // A well-formed frame over the limit still ends the connection.
    let oversized = format!(
        r#"{{"event":"join-room","data":{{"displayName":"{}"}}}}"#,
        "x".repeat(4096)
    );
    alice
        .ws
        .send(tungstenite::Message::Text(oversized.into()))
        .await
        .unwrap();
    assert_eq!(bob.roster().await, [entry(&bob.id, "Bob")]);
}

#[tokio::test]
async fn roster_size_tracks_joins_minus_leaves() {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = relay::start_server_with_state(
        "127.0.0.1:0",
        Arc::clone(&state),
        std::path::Path::new("public"),
    )
    .await
    .unwrap();

    let mut observer = Client::connect(addr).await;

    let mut clients = Vec::new();
    for i in 0..4 {
        let mut c = Client::connect(addr).await;
        c.join(&format!("user-{i}")).await;
        assert_eq!(observer.roster().await.len(), i + 1);
        clients.push(c);
    }

    // Two leave.
    clients.truncate(2);
    let mut sizes = vec![observer.roster().await.len(), observer.roster().await.len()];
    sizes.sort_unstable();
    assert_eq!(sizes, [2, 3]);
    assert_eq!(state.roster().len(), 2);

    // The lurking observer never joined, so leaving changes nothing.
    drop(observer);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.roster().len(), 2);
    assert_eq!(state.connection_count(), 2);
}

#[tokio::test]
async fn static_bundle_is_served() {
    let public = tempfile::tempdir().unwrap();
    std::fs::write(public.path().join("index.html"), "<title>callroom</title>").unwrap();

    let (addr, _handle) = relay::start_server_with_state(
        "127.0.0.1:0",
        Arc::new(RelayState::new()),
        public.path(),
    )
    .await
    .unwrap();

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.contains("<title>callroom</title>"));
}
