//! Transports carrying envelope frames between clients and the gateway.

pub mod memory;
pub mod websocket;

pub use memory::{MemoryPeer, MemoryTransport};
pub use websocket::{ListenerEvent, WsTransport};
