use serde::{Deserialize, Serialize};

use crate::error::RpcError;
use crate::message::CallId;
use crate::tool::{InvocationOutcome, ToolPayload};

/// Lifecycle message for a single tool invocation.
///
/// A producer emits these in send order for each correlation id; the
/// consuming tracker relies on that order and never reorders them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationUpdate {
    /// Correlation id of the invocation.
    pub call_id: CallId,
    /// Tool name, when already known. Early streaming chunks may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Phase reported by this message.
    pub phase: InvocationPhase,
}

/// Phase reported by an [`InvocationUpdate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum InvocationPhase {
    /// Arguments are still arriving.
    Streaming {
        /// Raw argument text received so far.
        #[serde(default)]
        args_text: String,
        /// Best-effort parse of the partial arguments.
        #[serde(default)]
        args: serde_json::Value,
    },
    /// Arguments are complete and dispatch is in flight.
    Call { args: serde_json::Value },
    /// Terminal result.
    Result {
        args: serde_json::Value,
        outcome: InvocationOutcome,
    },
}

impl InvocationUpdate {
    /// Partial-argument message.
    pub fn streaming(
        call_id: CallId,
        tool_name: Option<&str>,
        args_text: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            call_id,
            tool_name: tool_name.map(str::to_string),
            phase: InvocationPhase::Streaming {
                args_text: args_text.into(),
                args,
            },
        }
    }

    /// Dispatch-in-flight message.
    pub fn call(call_id: CallId, tool_name: &str, args: serde_json::Value) -> Self {
        Self {
            call_id,
            tool_name: Some(tool_name.to_string()),
            phase: InvocationPhase::Call { args },
        }
    }

    /// Terminal message carrying an outcome.
    pub fn result(
        call_id: CallId,
        tool_name: &str,
        args: serde_json::Value,
        outcome: InvocationOutcome,
    ) -> Self {
        Self {
            call_id,
            tool_name: Some(tool_name.to_string()),
            phase: InvocationPhase::Result { args, outcome },
        }
    }

    /// Terminal message for a normally completed call.
    pub fn completed(
        call_id: CallId,
        tool_name: &str,
        args: serde_json::Value,
        payload: ToolPayload,
    ) -> Self {
        Self::result(
            call_id,
            tool_name,
            args,
            InvocationOutcome::Completed(payload),
        )
    }

    /// Terminal message for a user-aborted call.
    pub fn aborted(call_id: CallId, tool_name: &str, args: serde_json::Value) -> Self {
        Self::result(call_id, tool_name, args, InvocationOutcome::Aborted)
    }

    /// Terminal message for a call whose sandbox operation failed.
    pub fn failed(
        call_id: CallId,
        tool_name: &str,
        args: serde_json::Value,
        error: RpcError,
    ) -> Self {
        Self::result(call_id, tool_name, args, InvocationOutcome::Failed(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_update_may_omit_tool_name() {
        let update = InvocationUpdate::streaming(
            CallId::from("c1"),
            None,
            "{\"action\":\"le",
            serde_json::Value::Null,
        );
        let value = serde_json::to_value(&update).expect("serialize");
        assert_eq!(value["phase"]["state"], "streaming");
        assert!(value.get("tool_name").is_none());
    }

    #[test]
    fn result_update_round_trips_through_json() {
        let update = InvocationUpdate::completed(
            CallId::from("c2"),
            "computer_use",
            serde_json::json!({"action": "left_click", "coordinate": [1, 2]}),
            ToolPayload::Text("Left clicked at 1, 2".into()),
        );
        let text = serde_json::to_string(&update).expect("serialize");
        let back: InvocationUpdate = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, update);
    }

    #[test]
    fn aborted_update_carries_abort_outcome() {
        let update = InvocationUpdate::aborted(CallId::from("c3"), "bash_command", serde_json::json!({}));
        match update.phase {
            InvocationPhase::Result { outcome, .. } => assert!(outcome.is_aborted()),
            other => panic!("unexpected phase: {other:?}"),
        }
    }

    #[test]
    fn failed_update_is_terminal_and_not_aborted() {
        let update = InvocationUpdate::failed(
            CallId::from("c4"),
            "computer_use",
            serde_json::json!({"action": "screenshot"}),
            RpcError::new(crate::ErrorCode::InternalError, "capture failed"),
        );
        match update.phase {
            InvocationPhase::Result { outcome, .. } => {
                assert!(!outcome.is_aborted());
                assert_eq!(outcome.error().map(|e| e.message.as_str()), Some("capture failed"));
            }
            other => panic!("unexpected phase: {other:?}"),
        }
    }
}
