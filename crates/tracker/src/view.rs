//! What a renderer shows for one tracked invocation.
//!
//! Plain strings and enums only; layout, icons and styling belong to the
//! renderer.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use proto::{CallId, ToolPayload};
use serde::Serialize;
use serde_json::Value;
use tools::{Action, format_number};

use crate::state::InvocationState;
use crate::tracker::{InvocationEntry, Screenshots};

const GENERATING_PREFIX: usize = 50;
const UNKNOWN_ACTION_PREFIX: usize = 40;
const COMMAND_PREFIX: usize = 60;
const STREAMING_DETAIL: &str = "(streaming...)";

/// Where the invocation sits in the conversation being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderContext {
    /// The invocation belongs to the newest message.
    pub is_latest: bool,
    /// The conversation is still producing output.
    pub busy: bool,
}

/// Tool family, used to pick a presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Computer,
    Bash,
    Other(String),
}

impl ToolKind {
    /// Resolves a tool name. Unnamed streaming entries render as computer
    /// actions.
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            None | Some("computer") | Some("computer_use") => Self::Computer,
            Some("bash") | Some("bash_command") => Self::Bash,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Executing,
    /// Committed but never answered, and nothing is running any more.
    Interrupted,
    Success,
    Aborted,
    /// Dispatched, and the sandbox operation failed.
    Failed,
}

impl Status {
    fn of(entry: &InvocationEntry, ctx: RenderContext) -> Self {
        match entry.state {
            InvocationState::Streaming => Self::Pending,
            InvocationState::Call if ctx.is_latest && ctx.busy => Self::Executing,
            InvocationState::Call => Self::Interrupted,
            InvocationState::Result if entry.is_aborted() => Self::Aborted,
            InvocationState::Result if entry.is_failed() => Self::Failed,
            InvocationState::Result => Self::Success,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending...",
            Self::Executing => "Executing...",
            Self::Interrupted => "Interrupted",
            Self::Success => "Success",
            Self::Aborted => "Aborted",
            Self::Failed => "Failed",
        }
    }
}

/// Renderer-facing snapshot of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationView {
    pub call_id: CallId,
    pub tool: ToolKind,
    pub state: InvocationState,
    pub status: Status,
    pub label: String,
    pub detail: Option<String>,
    /// Base64 PNG returned by a screenshot action.
    pub image: Option<String>,
    /// Base64 PNG taken before the action.
    pub before: Option<String>,
    /// Base64 PNG taken after the action.
    pub after: Option<String>,
}

impl InvocationView {
    pub(crate) fn build(
        entry: &InvocationEntry,
        screenshots: Option<&Screenshots>,
        ctx: RenderContext,
    ) -> Self {
        let tool = ToolKind::from_name(entry.tool_name.as_deref());
        let (label, detail) = match &tool {
            ToolKind::Computer => computer_text(entry),
            ToolKind::Bash => bash_text(entry),
            ToolKind::Other(name) => (
                format!("{name}: {}", entry.state),
                serde_json::to_string_pretty(&entry.args).ok(),
            ),
        };

        let image = entry
            .outcome
            .as_ref()
            .and_then(|o| o.payload())
            .and_then(ToolPayload::image_base64);

        // a screenshot action's own capture is the image; no before/after
        let (before, after) = match (screenshots, entry.action()) {
            (Some(shots), action) if action != Some("screenshot") => (
                shots.before.as_deref().map(|b| STANDARD.encode(b)),
                shots.after.as_deref().map(|b| STANDARD.encode(b)),
            ),
            _ => (None, None),
        };

        Self {
            call_id: entry.call_id.clone(),
            tool,
            state: entry.state,
            status: Status::of(entry, ctx),
            label,
            detail,
            image,
            before,
            after,
        }
    }
}

fn computer_text(entry: &InvocationEntry) -> (String, Option<String>) {
    let streaming = entry.state == InvocationState::Streaming;
    let has_text = !entry.args_text.is_empty();

    let Some(action) = entry.action() else {
        return match (streaming, has_text) {
            (true, true) => (
                "Generating".to_string(),
                Some(prefix(&entry.args_text, GENERATING_PREFIX)),
            ),
            (true, false) => ("Starting".to_string(), None),
            (false, _) => ("Preparing action".to_string(), None),
        };
    };

    let Ok(known) = action.parse::<Action>() else {
        let detail = (streaming && has_text)
            .then(|| prefix(&entry.args_text, UNKNOWN_ACTION_PREFIX));
        return (action.to_string(), detail);
    };

    let args = &entry.args;
    let detail = match known {
        Action::Screenshot => return (action_label(known).to_string(), None),
        Action::LeftClick | Action::RightClick | Action::DoubleClick => {
            pair(args, "coordinate").map(|at| format!("at ({at})"))
        }
        Action::MouseMove => pair(args, "coordinate").map(|to| format!("to ({to})")),
        Action::Type | Action::Key => truthy_text(args, "text").map(|t| format!("\"{t}\"")),
        Action::Wait => truthy_number(args, "duration").map(|d| format!("{d} seconds")),
        Action::Scroll => truthy_text(args, "scroll_direction")
            .zip(truthy_number(args, "scroll_amount"))
            .map(|(dir, amount)| format!("{dir} by {amount}")),
        Action::LeftClickDrag => pair(args, "start_coordinate")
            .zip(pair(args, "coordinate"))
            .map(|(from, to)| format!("from ({from}) to ({to})")),
    };
    let detail = detail.or_else(|| (streaming && has_text).then(|| STREAMING_DETAIL.to_string()));
    (action_label(known).to_string(), detail)
}

fn bash_text(entry: &InvocationEntry) -> (String, Option<String>) {
    let streaming = entry.state == InvocationState::Streaming;
    let label = if streaming {
        "Generating command"
    } else {
        "Running command"
    };
    let command = entry.args.get("command").and_then(Value::as_str);
    let detail = if streaming && !entry.args_text.is_empty() {
        prefix(&entry.args_text, COMMAND_PREFIX)
    } else {
        match command {
            Some(c) if !c.is_empty() => prefix(c, COMMAND_PREFIX),
            _ => "...".to_string(),
        }
    };
    (label.to_string(), Some(detail))
}

fn action_label(action: Action) -> &'static str {
    match action {
        Action::Screenshot => "Taking screenshot",
        Action::LeftClick => "Left clicking",
        Action::RightClick => "Right clicking",
        Action::DoubleClick => "Double clicking",
        Action::MouseMove => "Moving mouse",
        Action::Type => "Typing",
        Action::Key => "Pressing key",
        Action::Wait => "Waiting",
        Action::Scroll => "Scrolling",
        Action::LeftClickDrag => "Dragging",
    }
}

/// First `n` characters; display only.
fn prefix(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n.as_f64().map(format_number),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// `x, y` from a two-element array; partial arrays render nothing.
fn pair(args: &Value, key: &str) -> Option<String> {
    let items = args.get(key)?.as_array()?;
    match items.as_slice() {
        [x, y] => Some(format!("{}, {}", scalar(x)?, scalar(y)?)),
        _ => None,
    }
}

fn truthy_text(args: &Value, key: &str) -> Option<String> {
    scalar(args.get(key)?).filter(|s| !s.is_empty())
}

fn truthy_number(args: &Value, key: &str) -> Option<String> {
    let value = args.get(key)?;
    match value.as_f64() {
        Some(n) if n == 0.0 || n.is_nan() => None,
        _ => scalar(value).filter(|s| !s.is_empty()),
    }
}
