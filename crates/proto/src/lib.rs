//! Shared protocol types for the desktop tool server, its clients, and the
//! invocation tracker.
//!
//! This crate defines serializable tool/content/frame structures and
//! strongly-typed error enums shared across the workspace.

pub mod error;
pub mod event;
pub mod message;
pub mod rpc;
pub mod tool;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of invocation lifecycle messages.
pub use event::{InvocationPhase, InvocationUpdate};
/// Re-export of correlation identity types.
pub use message::CallId;
/// Re-export of RPC framing types.
pub use rpc::{Frame, PeerInfo, Reply, Request, ResponseBody};
/// Re-export of tool definition, content and result types.
pub use tool::{
    CallToolRequest, CallToolResult, Content, InvocationOutcome, PNG_MIME, ToolDefinition,
    ToolPayload,
};
