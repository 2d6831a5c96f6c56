//! Authoritative race server
//!
//! `RoomState` holds the canonical state of one room and is fully
//! synchronous; `RoomRegistry` runs many rooms on tokio, each with its own
//! lock, phase timer and event channel.

pub mod protocol;
pub mod registry;
pub mod room;

pub use protocol::{ClientMessage, PositionUpdate, ServerMessage};
pub use registry::{RoomHandle, RoomRegistry};
pub use room::{PlayerState, RoomSnapshot, RoomState};
