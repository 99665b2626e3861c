//! Tool dispatch server, client and the frame channels between them.

pub mod client;
pub mod server;
pub mod transport;

/// Caller-facing dispatch handle.
pub use client::DispatchClient;
/// Tool dispatch server.
pub use server::DispatchServer;
/// Ordered frame channels (in-process or framed byte streams).
pub use transport::{ChannelEnd, DEFAULT_BUFFER, MAX_FRAME_LEN, connect_tcp, framed, linked_pair};
