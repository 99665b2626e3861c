//! Tool listing, call request/response and result payload types.

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

use crate::error::RpcError;
use crate::message::CallId;

/// MIME type attached to every image content block.
pub const PNG_MIME: &str = "image/png";

/// One entry of the tool listing response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description for tool selection.
    pub description: String,
    /// JSON schema for accepted tool arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    /// Creates a tool definition entry.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A single content block of a tool call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Plain text output.
    Text { text: String },
    /// Base64-encoded image bytes.
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl Content {
    /// Builds a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Builds an image block from raw PNG bytes.
    pub fn png(bytes: &[u8]) -> Self {
        Self::Image {
            data: general_purpose::STANDARD.encode(bytes),
            mime_type: PNG_MIME.to_string(),
        }
    }

    /// Returns the text when this is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { .. } => None,
        }
    }
}

/// Request to invoke a tool by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolRequest {
    /// Tool name.
    pub name: String,
    /// Raw, untyped argument mapping. Validated by the server.
    #[serde(default)]
    pub arguments: serde_json::Value,
    /// Correlation id chosen by the caller, if any.
    #[serde(default, rename = "callId", skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
}

impl CallToolRequest {
    /// Creates a request without a caller-chosen correlation id.
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            call_id: None,
        }
    }

    /// Attaches a correlation id.
    pub fn with_call_id(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }
}

/// Successful tool call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Ordered content blocks.
    pub content: Vec<Content>,
}

impl CallToolResult {
    /// Returns the first text block, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(Content::as_text)
    }

    /// Decodes the response back into a payload.
    ///
    /// Returns `None` for an empty response or undecodable image data.
    pub fn to_payload(&self) -> Option<ToolPayload> {
        match self.content.first()? {
            Content::Text { text } => Some(ToolPayload::Text(text.clone())),
            Content::Image { data, .. } => general_purpose::STANDARD
                .decode(data)
                .ok()
                .map(ToolPayload::Image),
        }
    }
}

impl From<&ToolPayload> for CallToolResult {
    fn from(payload: &ToolPayload) -> Self {
        let block = match payload {
            ToolPayload::Text(text) => Content::text(text.clone()),
            ToolPayload::Image(bytes) => Content::png(bytes),
        };
        Self {
            content: vec![block],
        }
    }
}

/// Payload produced by a completed tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ToolPayload {
    /// Text result.
    Text(String),
    /// Binary image result; base64-encoded when serialized.
    Image(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl ToolPayload {
    /// Returns the text when this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Image(_) => None,
        }
    }

    /// Base64 encoding of image bytes, for display.
    pub fn image_base64(&self) -> Option<String> {
        match self {
            Self::Image(bytes) => Some(general_purpose::STANDARD.encode(bytes)),
            Self::Text(_) => None,
        }
    }
}

/// Terminal outcome of an invocation: a payload, a user abort, or a failure.
///
/// Abort is a value, not a fault, and cannot collide with any text payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "payload", rename_all = "lowercase")]
pub enum InvocationOutcome {
    /// Normal completion.
    Completed(ToolPayload),
    /// User cancelled the call.
    Aborted,
    /// The call was dispatched and the sandbox operation failed.
    Failed(RpcError),
}

impl InvocationOutcome {
    /// Whether this outcome is the abort marker.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// The error of a failed outcome.
    pub fn error(&self) -> Option<&RpcError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// The payload of a completed outcome.
    pub fn payload(&self) -> Option<&ToolPayload> {
        match self {
            Self::Completed(payload) => Some(payload),
            Self::Aborted | Self::Failed(_) => None,
        }
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
