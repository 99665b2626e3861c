//! Request/response frames exchanged between dispatch client and server.

use serde::{Deserialize, Serialize};

use crate::error::RpcError;
use crate::tool::{CallToolRequest, CallToolResult, ToolDefinition};

/// Name/version pair announced during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer name.
    pub name: String,
    /// Peer version.
    pub version: String,
}

impl PeerInfo {
    /// Creates peer info.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Requests a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    /// Handshake; must complete before any other request.
    Initialize { client: PeerInfo },
    /// Tool discovery.
    ListTools,
    /// Tool invocation.
    CallTool(CallToolRequest),
}

/// Successful response bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Handshake answer.
    Initialized { server: PeerInfo },
    /// Tool listing.
    Tools { tools: Vec<ToolDefinition> },
    /// Tool call result.
    ToolResult(CallToolResult),
}

/// Either a result or a typed protocol error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply {
    Result(ResponseBody),
    Error(RpcError),
}

impl From<Result<ResponseBody, RpcError>> for Reply {
    fn from(result: Result<ResponseBody, RpcError>) -> Self {
        match result {
            Ok(body) => Self::Result(body),
            Err(err) => Self::Error(err),
        }
    }
}

impl From<Reply> for Result<ResponseBody, RpcError> {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Result(body) => Ok(body),
            Reply::Error(err) => Err(err),
        }
    }
}

/// One message on the transport channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Client → server.
    Request { id: u64, request: Request },
    /// Server → client, answering the request with the same id.
    Response { id: u64, reply: Reply },
}

impl Frame {
    /// Frame id.
    pub fn id(&self) -> u64 {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => *id,
        }
    }
}
