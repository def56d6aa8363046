//! Shared protocol definitions for the Callroom signaling wire format.

pub mod participant;
pub mod signal;
