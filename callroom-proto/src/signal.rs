//! Signaling wire protocol between browser clients and the relay server.
//!
//! Every WebSocket text frame carries one JSON object of the form
//! `{"event": "<kind>", "data": {...}}`. Kinds without a payload (such as the
//! outbound `hang-up`) omit `data`. Field names inside `data` are camelCase.
//!
//! Negotiation descriptors (offers, answers) and network-path candidates are
//! carried as [`Descriptor`]s: the raw JSON text the client sent, forwarded
//! without being parsed into a tree.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::participant::{ConnectionId, Participant};

/// Error type for signaling encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The message could not be serialized to JSON.
    #[error("encode error: {0}")]
    Encode(String),
    /// The frame is not valid JSON or does not match any known message kind.
    #[error("decode error: {0}")]
    Decode(String),
}

/// An opaque JSON value relayed byte-for-byte.
///
/// Key order, number precision and formatting of the original text are kept.
/// Two descriptors are equal when their JSON text is identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(Box<RawValue>);

impl Descriptor {
    /// Wraps a JSON document. Surrounding whitespace is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if `json` is not a single valid JSON value.
    pub fn parse(json: impl Into<String>) -> Result<Self, CodecError> {
        RawValue::from_string(json.into())
            .map(Self)
            .map_err(|e| CodecError::Decode(e.to_string()))
    }

    /// The JSON text as received.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.get()
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Descriptor {}

/// Messages sent by a client to the server.
///
/// The `from` fields are accepted for compatibility with clients that fill
/// them in, but the server always replaces them with the sender's own
/// connection id before forwarding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Announce a display name and enter the shared roster.
    JoinRoom {
        /// Name shown to other users. Blank names are ignored by the server.
        display_name: String,
    },

    /// Start a call by sending a session offer to `to`.
    CallOffer {
        /// Connection being called.
        to: ConnectionId,
        /// Client-claimed sender id (ignored).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ConnectionId>,
        /// Caller's display name, shown to the callee.
        display_name: String,
        /// Opaque session offer.
        offer: Descriptor,
    },

    /// Accept an incoming call, answering the caller's offer.
    CallAccepted {
        /// The caller.
        to: ConnectionId,
        /// Client-claimed sender id (ignored).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ConnectionId>,
        /// Opaque session answer.
        answer: Descriptor,
    },

    /// Decline an incoming call.
    CallRejected {
        /// The caller.
        to: ConnectionId,
        /// Client-claimed sender id (ignored).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ConnectionId>,
    },

    /// Hand a network-path candidate to the other side of the call.
    IceCandidate {
        /// The peer.
        to: ConnectionId,
        /// Opaque candidate descriptor.
        candidate: Descriptor,
    },

    /// End the call.
    HangUp {
        /// The peer.
        to: ConnectionId,
        /// Client-claimed sender id (ignored).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ConnectionId>,
    },
}

impl ClientMessage {
    /// Returns the destination of a relayed message, or `None` for
    /// `join-room`, which is handled by the directory.
    #[must_use]
    pub const fn destination(&self) -> Option<&ConnectionId> {
        match self {
            Self::JoinRoom { .. } => None,
            Self::CallOffer { to, .. }
            | Self::CallAccepted { to, .. }
            | Self::CallRejected { to, .. }
            | Self::IceCandidate { to, .. }
            | Self::HangUp { to, .. } => Some(to),
        }
    }

    /// The sender id the client claimed, if it supplied one.
    #[must_use]
    pub const fn claimed_from(&self) -> Option<&ConnectionId> {
        match self {
            Self::CallOffer { from, .. }
            | Self::CallAccepted { from, .. }
            | Self::CallRejected { from, .. }
            | Self::HangUp { from, .. } => from.as_ref(),
            Self::JoinRoom { .. } | Self::IceCandidate { .. } => None,
        }
    }

    /// Wire name of this message kind, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::CallOffer { .. } => "call-offer",
            Self::CallAccepted { .. } => "call-accepted",
            Self::CallRejected { .. } => "call-rejected",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::HangUp { .. } => "hang-up",
        }
    }

    /// Converts a relayable message into what its destination receives,
    /// stamping `from` with the authenticated sender.
    ///
    /// Returns `None` for `join-room`.
    #[must_use]
    pub fn into_forward(self, sender: &ConnectionId) -> Option<(ConnectionId, ServerMessage)> {
        let routed = match self {
            Self::JoinRoom { .. } => return None,
            Self::CallOffer {
                to,
                display_name,
                offer,
                ..
            } => (
                to,
                ServerMessage::IncomingCall {
                    from: sender.clone(),
                    display_name,
                    offer,
                },
            ),
            Self::CallAccepted { to, answer, .. } => (
                to,
                ServerMessage::CallAccepted {
                    from: sender.clone(),
                    answer,
                },
            ),
            Self::CallRejected { to, .. } => (
                to,
                ServerMessage::CallRejected {
                    from: sender.clone(),
                },
            ),
            Self::IceCandidate { to, candidate } => {
                (to, ServerMessage::RemoteIceCandidate { candidate })
            }
            Self::HangUp { to, .. } => (to, ServerMessage::HangUp),
        };
        Some(routed)
    }
}

/// Messages sent by the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// First frame on every connection: tells the client its own id.
    Connected {
        /// The id assigned to this connection.
        id: ConnectionId,
    },

    /// Full roster snapshot, broadcast to every connection after each
    /// membership change.
    RosterUpdate {
        /// All joined users, in join order.
        users: Vec<Participant>,
    },

    /// Someone is calling.
    IncomingCall {
        /// The caller's connection id.
        from: ConnectionId,
        /// The caller's display name.
        display_name: String,
        /// Opaque session offer.
        offer: Descriptor,
    },

    /// The callee accepted.
    CallAccepted {
        /// The callee's connection id.
        from: ConnectionId,
        /// Opaque session answer.
        answer: Descriptor,
    },

    /// The callee declined.
    CallRejected {
        /// The callee's connection id.
        from: ConnectionId,
    },

    /// A network-path candidate from the peer.
    RemoteIceCandidate {
        /// Opaque candidate descriptor.
        candidate: Descriptor,
    },

    /// The peer ended the call.
    HangUp,
}

/// Encodes a signaling message as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the message cannot be serialized.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Outer `{event, data}` object of a frame, with both members left unparsed.
#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(borrow)]
    event: &'a RawValue,
    #[serde(borrow)]
    data: Option<&'a RawValue>,
}

impl Envelope<'_> {
    /// Re-emits the frame with `event` first. Raw descriptors can only be
    /// captured when the tag is read before the payload, and browsers are free
    /// to send the members in either order.
    fn tag_first(&self) -> String {
        match self.data {
            Some(data) => format!(r#"{{"event":{},"data":{}}}"#, self.event.get(), data.get()),
            None => format!(r#"{{"event":{}}}"#, self.event.get()),
        }
    }
}

/// Decodes a signaling message from a JSON text frame.
///
/// Members other than `event` and `data` are ignored.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the text is not valid JSON or names an
/// unknown event or is missing required fields.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    let envelope: Envelope<'_> =
        serde_json::from_str(text).map_err(|e| CodecError::Decode(e.to_string()))?;
    serde_json::from_str(&envelope.tag_first()).map_err(|e| CodecError::Decode(e.to_string()))
}
