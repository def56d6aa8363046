//! Callroom relay server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The server accepts WebSocket connections, keeps a roster of named users,
//! and forwards call signaling between two connections by id.

pub mod config;
pub mod directory;
pub mod relay;
