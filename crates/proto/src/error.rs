use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Dispatch server runtime error.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Frame transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Tool call dispatch error.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Client-side call error.
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error codes carried on the wire. No other codes are defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ErrorCode {
    /// Arguments failed schema validation.
    InvalidParams,
    /// Tool name is not in the registry.
    MethodNotFound,
    /// Server-side failure (no sandbox bound, sandbox operation failed).
    InternalError,
}

impl ErrorCode {
    /// Numeric JSON-RPC code for this error.
    pub const fn code(self) -> i32 {
        match self {
            Self::InvalidParams => -32602,
            Self::MethodNotFound => -32601,
            Self::InternalError => -32603,
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            -32602 => Ok(Self::InvalidParams),
            -32601 => Ok(Self::MethodNotFound),
            -32603 => Ok(Self::InternalError),
            other => Err(format!("unknown error code: {other}")),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidParams => write!(f, "InvalidParams"),
            Self::MethodNotFound => write!(f, "MethodNotFound"),
            Self::InternalError => write!(f, "InternalError"),
        }
    }
}

/// Typed protocol error returned to callers in place of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    /// Error classification.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl RpcError {
    /// Creates a protocol error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Argument validation errors. These never reach the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The argument payload was not a JSON object.
    #[error("Invalid {tool} arguments: expected an object")]
    NotAnObject { tool: String },

    /// A field required by the tool or action is absent.
    #[error("{field} required for {context}")]
    MissingField { field: String, context: String },

    /// A field is present but has the wrong type or an out-of-range value.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// `action` is not one of the enumerated computer actions.
    #[error("Unknown action: {0}")]
    UnknownAction(String),
}

impl ValidationError {
    /// Shorthand for [`ValidationError::MissingField`].
    pub fn missing(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Shorthand for [`ValidationError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failures reported by the sandbox capability implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    /// A capability call failed.
    #[error("{operation} failed: {reason}")]
    Operation {
        operation: &'static str,
        reason: String,
    },

    /// The sandbox is gone or unreachable.
    #[error("Sandbox unavailable: {0}")]
    Unavailable(String),
}

impl SandboxError {
    /// Shorthand for [`SandboxError::Operation`].
    pub fn operation(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Operation {
            operation,
            reason: reason.into(),
        }
    }
}

/// Errors produced while dispatching a single tool call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Arguments did not match the tool schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Tool name is not registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// No sandbox has been bound to the server yet.
    #[error("Desktop sandbox not initialized")]
    NotInitialized,

    /// The sandbox capability failed mid-dispatch.
    #[error("Sandbox error: {0}")]
    Capability(#[from] SandboxError),
}

impl DispatchError {
    /// Wire error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::InvalidParams,
            Self::UnknownTool(_) => ErrorCode::MethodNotFound,
            Self::NotInitialized | Self::Capability(_) => ErrorCode::InternalError,
        }
    }

    /// Converts into the wire representation.
    pub fn to_rpc(&self) -> RpcError {
        RpcError::new(self.code(), self.to_string())
    }
}

impl From<DispatchError> for RpcError {
    fn from(err: DispatchError) -> Self {
        err.to_rpc()
    }
}

/// Dispatch server errors outside of a single call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A different sandbox was bound while calls were still running.
    #[error("Sandbox is busy with {in_flight} outstanding call(s)")]
    SandboxBusy { in_flight: usize },

    /// Listener/socket failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Underlying frame transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Frame transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer end was dropped.
    #[error("Transport closed")]
    Closed,

    /// Inbound frame exceeds the configured maximum.
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Frame could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Socket/pipe IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors observed by a dispatch client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A call was issued before `connect`.
    #[error("Client is not connected")]
    NotConnected,

    /// A call was issued after `close`, or the channel went away mid-call.
    #[error("Client is closed")]
    Closed,

    /// `connect` was called on a client that is already attached.
    #[error("Client is already connected")]
    AlreadyConnected,

    /// The server answered with a typed protocol error.
    #[error("Server error: {0}")]
    Rpc(#[from] RpcError),

    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a response of the wrong shape.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}
