//! Relay server core: shared state, WebSocket handler, roster broadcast, and
//! signal forwarding.
//!
//! Each WebSocket connection gets a server-assigned [`ConnectionId`]. Clients
//! join the shared roster by announcing a display name, then address call
//! signaling (offers, answers, candidates, hang-ups) to each other by id. The
//! relay stamps every forwarded message with the sender's real id and delivers
//! it to the addressed connection only. Nothing is queued: a message for a
//! connection that is not live is dropped.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use callroom_proto::participant::{ConnectionId, Participant};
use callroom_proto::signal::{self, ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::directory::{Directory, DirectoryError};

/// Default maximum inbound WebSocket message size in bytes (64 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default directory holding the static client bundle.
pub const DEFAULT_PUBLIC_DIR: &str = "public";

/// Live connections and the roster, guarded together so that a membership
/// change and its broadcast happen as one step.
#[derive(Default)]
struct Hub {
    /// Maps each live connection to its outbound message channel.
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>,
    /// Joined participants.
    directory: Directory,
}

impl Hub {
    /// Sends the current roster to every live connection.
    fn broadcast_roster(&self) {
        let users = self.directory.snapshot();
        tracing::debug!(
            users = users.len(),
            connections = self.connections.len(),
            "broadcasting roster"
        );
        for (conn_id, sender) in &self.connections {
            let update = ServerMessage::RosterUpdate {
                users: users.clone(),
            };
            if sender.send(update).is_err() {
                tracing::debug!(conn_id = %conn_id, "roster not delivered, connection closing");
            }
        }
    }
}

/// Shared relay server state holding the connection map and the directory.
///
/// Every operation completes synchronously under one lock and never awaits,
/// so roster snapshots are never torn and all connections observe roster
/// updates in the same order.
pub struct RelayState {
    hub: Mutex<Hub>,
    /// Maximum accepted inbound WebSocket message size in bytes.
    max_message_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a new relay state with no connections and an empty directory,
    /// using the default message size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Creates a new relay state with a custom inbound message size limit.
    #[must_use]
    pub fn with_config(max_message_size: usize) -> Self {
        Self {
            hub: Mutex::new(Hub::default()),
            max_message_size,
        }
    }

    /// Maximum accepted inbound WebSocket message size in bytes.
    #[must_use]
    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Registers a live connection and the sender half of its outbound channel.
    ///
    /// Ids are fresh per socket, so a repeat registration replaces the old
    /// channel and is logged.
    pub fn connect(&self, conn_id: ConnectionId, sender: mpsc::UnboundedSender<ServerMessage>) {
        let replaced = self.hub.lock().connections.insert(conn_id.clone(), sender);
        if replaced.is_some() {
            tracing::warn!(conn_id = %conn_id, "replaced existing connection channel");
        }
    }

    /// Drops a connection and removes it from the roster.
    ///
    /// If the connection had joined, the remaining connections receive the
    /// updated roster and the removed record is returned.
    pub fn disconnect(&self, conn_id: &ConnectionId) -> Option<Participant> {
        let mut hub = self.hub.lock();
        hub.connections.remove(conn_id);
        let removed = hub.directory.leave(conn_id)?;
        hub.broadcast_roster();
        drop(hub);
        Some(removed)
    }

    /// Adds or renames `conn_id` in the roster and broadcasts the result to
    /// every live connection, the joiner included.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::BlankName`] for a blank display name; nothing
    /// is broadcast in that case.
    pub fn join(&self, conn_id: &ConnectionId, display_name: &str) -> Result<(), DirectoryError> {
        let mut hub = self.hub.lock();
        hub.directory.join(conn_id, display_name)?;
        hub.broadcast_roster();
        drop(hub);
        Ok(())
    }

    /// Delivers `msg` to the live connection `to`.
    ///
    /// Returns `false` if `to` is not live, is the sender itself, or its
    /// channel has closed.
    pub fn forward(&self, sender: &ConnectionId, to: &ConnectionId, msg: ServerMessage) -> bool {
        if to == sender {
            return false;
        }
        let hub = self.hub.lock();
        hub.connections
            .get(to)
            .is_some_and(|target| target.send(msg).is_ok())
    }

    /// Handles one decoded message from `sender`.
    pub fn dispatch(&self, sender: &ConnectionId, msg: ClientMessage) {
        if let Some(claimed) = msg.claimed_from()
            && claimed != sender
        {
            tracing::debug!(
                conn_id = %sender,
                claimed = %claimed,
                "ignoring client-supplied sender id"
            );
        }

        let kind = msg.kind();
        match msg {
            ClientMessage::JoinRoom { display_name } => {
                match self.join(sender, &display_name) {
                    Ok(()) => {
                        tracing::info!(conn_id = %sender, name = %display_name, "user joined");
                    }
                    Err(e) => {
                        tracing::warn!(conn_id = %sender, error = %e, "ignoring join-room");
                    }
                }
            }
            relayed => {
                let Some((to, outbound)) = relayed.into_forward(sender) else {
                    return;
                };
                if self.forward(sender, &to, outbound) {
                    tracing::debug!(from = %sender, to = %to, kind, "forwarded signal");
                } else {
                    tracing::debug!(from = %sender, to = %to, kind, "destination unreachable, dropped");
                }
            }
        }
    }

    /// Returns the current roster in join order.
    #[must_use]
    pub fn roster(&self) -> Vec<Participant> {
        self.hub.lock().directory.snapshot()
    }

    /// Number of live connections, joined or not.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.hub.lock().connections.len()
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Assign a fresh [`ConnectionId`] and register the connection.
/// 2. Send `connected` so the client learns its own id.
/// 3. Enter the message loop, dispatching decoded frames.
/// 4. On disconnect, unregister and drop the client from the roster.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let conn_id = ConnectionId::new();

    // Queue the greeting before registering so it precedes any roster update.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    if tx
        .send(ServerMessage::Connected {
            id: conn_id.clone(),
        })
        .is_err()
    {
        tracing::error!(conn_id = %conn_id, "outbound channel closed before greeting");
        return;
    }
    state.connect(conn_id.clone(), tx);

    tracing::info!(conn_id = %conn_id, "client connected");

    // Writer task: forwards queued messages from the channel to the WebSocket.
    let writer_conn_id = conn_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match signal::encode(&msg) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(conn_id = %writer_conn_id, error = %e, "failed to encode outbound message");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                tracing::warn!(conn_id = %writer_conn_id, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader loop: process incoming frames from this client. A frame over
    // `max_message_size` surfaces as a read error and ends the loop.
    let reader_conn_id = conn_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_message(&reader_conn_id, text.as_str(), &reader_state);
                }
                Message::Close(_) => {
                    tracing::info!(conn_id = %reader_conn_id, "received close frame");
                    break;
                }
                Message::Binary(_) => {
                    tracing::debug!(conn_id = %reader_conn_id, "ignoring binary frame");
                }
                // Ping and pong are answered by axum.
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    match state.disconnect(&conn_id) {
        Some(left) => {
            tracing::info!(conn_id = %conn_id, name = %left.name, "user left");
        }
        None => {
            tracing::info!(conn_id = %conn_id, "client disconnected before joining");
        }
    }
}

/// Decodes a text frame from `conn_id` and dispatches it.
fn handle_text_message(conn_id: &ConnectionId, text: &str, state: &RelayState) {
    match signal::decode::<ClientMessage>(text) {
        Ok(msg) => state.dispatch(conn_id, msg),
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "failed to decode message");
        }
    }
}

/// Builds the HTTP router: the WebSocket endpoint at `/ws` and the static
/// client bundle from `public_dir` for every other path.
pub fn router(state: Arc<RelayState>, public_dir: &Path) -> axum::Router {
    let bundle = ServeDir::new(public_dir).fallback(ServeFile::new(public_dir.join("index.html")));

    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .fallback_service(bundle)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the relay server on the given address with default state, serving
/// the client bundle from [`DEFAULT_PUBLIC_DIR`].
///
/// This is the primary entry point used by test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new()), Path::new(DEFAULT_PUBLIC_DIR))
        .await
}

/// Starts the relay server with a pre-configured [`RelayState`] and client
/// bundle directory.
///
/// Use [`RelayState::with_config`] to create a state with the message size
/// limit from the resolved [`crate::config::RelayConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
    public_dir: &Path,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state, public_dir);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port) and returns the bound address
/// and a [`tokio::task::JoinHandle`] for cleanup.
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.max_message_size(state.max_message_size())
        .on_upgrade(move |socket| handle_socket(socket, state))
}
