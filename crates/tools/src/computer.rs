//! `computer_use` tool: mouse, keyboard, screenshot and wait actions.

use std::time::Duration;

use async_trait::async_trait;
use proto::{SandboxError, ToolPayload, ValidationError};
use tracing::debug;

use crate::sandbox::{Point, Sandbox, ScrollDirection};
use crate::schema::{FieldKind, FieldSpec, Fields, ToolSchema};
use crate::{Tool, format_number};

/// Default and lower bound for `wait`, in seconds.
pub const MIN_WAIT_SECS: f64 = 1.0;
/// Upper bound for `wait`, in seconds. Not configurable.
pub const MAX_WAIT_SECS: f64 = 2.0;
/// Scroll clicks used when `scroll_amount` is absent or zero.
pub const DEFAULT_SCROLL_AMOUNT: f64 = 3.0;

static SCHEMA: ToolSchema = ToolSchema {
    name: "computer_use",
    description: "Use the computer to perform actions like clicking, typing, taking screenshots, etc.",
    fields: &[
        FieldSpec {
            name: "action",
            kind: FieldKind::Enum(Action::NAMES),
            required: true,
            description: "The action to perform",
        },
        FieldSpec {
            name: "coordinate",
            kind: FieldKind::NumberPair,
            required: false,
            description: "[x, y] target for clicks, mouse_move, and the end of left_click_drag",
        },
        FieldSpec {
            name: "text",
            kind: FieldKind::String,
            required: false,
            description: "Text to type, or key name for the key action",
        },
        FieldSpec {
            name: "scroll_direction",
            kind: FieldKind::Enum(ScrollDirection::NAMES),
            required: false,
            description: "Scroll direction for the scroll action",
        },
        FieldSpec {
            name: "scroll_amount",
            kind: FieldKind::Number,
            required: false,
            description: "Number of scroll clicks (default: 3)",
        },
        FieldSpec {
            name: "start_coordinate",
            kind: FieldKind::NumberPair,
            required: false,
            description: "[x, y] start of left_click_drag",
        },
        FieldSpec {
            name: "duration",
            kind: FieldKind::Number,
            required: false,
            description: "Seconds to wait (clamped to 1..=2)",
        },
    ],
};

/// Action names accepted by `computer_use`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Screenshot,
    LeftClick,
    DoubleClick,
    RightClick,
    MouseMove,
    Type,
    Key,
    Scroll,
    LeftClickDrag,
    Wait,
}

impl Action {
    pub const ALL: [Action; 10] = [
        Action::Screenshot,
        Action::LeftClick,
        Action::DoubleClick,
        Action::RightClick,
        Action::MouseMove,
        Action::Type,
        Action::Key,
        Action::Scroll,
        Action::LeftClickDrag,
        Action::Wait,
    ];

    /// Wire names, in the same order as [`Action::ALL`].
    pub const NAMES: &'static [&'static str] = &[
        "screenshot",
        "left_click",
        "double_click",
        "right_click",
        "mouse_move",
        "type",
        "key",
        "scroll",
        "left_click_drag",
        "wait",
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::LeftClick => "left_click",
            Self::DoubleClick => "double_click",
            Self::RightClick => "right_click",
            Self::MouseMove => "mouse_move",
            Self::Type => "type",
            Self::Key => "key",
            Self::Scroll => "scroll",
            Self::LeftClickDrag => "left_click_drag",
            Self::Wait => "wait",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownAction(s.to_string()))
    }
}

/// Mouse button variant for click actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Left,
    Right,
    Double,
}

impl ClickKind {
    fn label(self) -> &'static str {
        match self {
            Self::Left => "Left",
            Self::Right => "Right",
            Self::Double => "Double",
        }
    }
}

/// A validated `computer_use` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputerAction {
    Screenshot,
    /// `seconds` is the requested duration, before clamping.
    Wait { seconds: Option<f64> },
    Click { kind: ClickKind, at: Point },
    MouseMove { to: Point },
    Type { text: String },
    Key { key: String },
    Scroll { direction: ScrollDirection, amount: f64 },
    Drag { from: Point, to: Point },
}

impl ComputerAction {
    /// Parses a raw argument object.
    pub fn parse(raw: &serde_json::Value) -> Result<Self, ValidationError> {
        let fields = Fields::new(SCHEMA.name, raw)?;

        // Type-check every declared field up front, whatever the action.
        let action = fields
            .string("action")?
            .ok_or_else(|| ValidationError::missing("action", SCHEMA.name))?
            .parse::<Action>()?;
        let coordinate = fields.point("coordinate")?;
        let start_coordinate = fields.point("start_coordinate")?;
        let text = fields.string("text")?;
        let scroll_direction = fields.one_of("scroll_direction", ScrollDirection::NAMES)?;
        let scroll_amount = fields.number("scroll_amount")?;
        let duration = fields.number("duration")?;

        let context = action.as_str();
        let require_point = |point: Option<Point>, name: &str| {
            point.ok_or_else(|| ValidationError::missing(name, context))
        };
        let require_text = || match text {
            Some(t) if !t.is_empty() => Ok(t.to_string()),
            _ => Err(ValidationError::missing("text", context)),
        };

        let parsed = match action {
            Action::Screenshot => Self::Screenshot,
            Action::Wait => Self::Wait { seconds: duration },
            Action::LeftClick => Self::Click {
                kind: ClickKind::Left,
                at: require_point(coordinate, "coordinate")?,
            },
            Action::RightClick => Self::Click {
                kind: ClickKind::Right,
                at: require_point(coordinate, "coordinate")?,
            },
            Action::DoubleClick => Self::Click {
                kind: ClickKind::Double,
                at: require_point(coordinate, "coordinate")?,
            },
            Action::MouseMove => Self::MouseMove {
                to: require_point(coordinate, "coordinate")?,
            },
            Action::Type => Self::Type {
                text: require_text()?,
            },
            Action::Key => Self::Key { key: require_text()? },
            Action::Scroll => {
                let direction = scroll_direction
                    .ok_or_else(|| ValidationError::missing("scroll_direction", context))?
                    .parse::<ScrollDirection>()
                    .map_err(|reason| ValidationError::invalid("scroll_direction", reason))?;
                Self::Scroll {
                    direction,
                    amount: scroll_amount_or_default(scroll_amount)?,
                }
            }
            Action::LeftClickDrag => Self::Drag {
                from: require_point(start_coordinate, "start_coordinate")?,
                to: require_point(coordinate, "coordinate")?,
            },
        };
        Ok(parsed)
    }

    /// The action name this call was parsed from.
    pub fn action(&self) -> Action {
        match self {
            Self::Screenshot => Action::Screenshot,
            Self::Wait { .. } => Action::Wait,
            Self::Click {
                kind: ClickKind::Left,
                ..
            } => Action::LeftClick,
            Self::Click {
                kind: ClickKind::Right,
                ..
            } => Action::RightClick,
            Self::Click {
                kind: ClickKind::Double,
                ..
            } => Action::DoubleClick,
            Self::MouseMove { .. } => Action::MouseMove,
            Self::Type { .. } => Action::Type,
            Self::Key { .. } => Action::Key,
            Self::Scroll { .. } => Action::Scroll,
            Self::Drag { .. } => Action::LeftClickDrag,
        }
    }
}

fn scroll_amount_or_default(amount: Option<f64>) -> Result<f64, ValidationError> {
    match amount {
        None => Ok(DEFAULT_SCROLL_AMOUNT),
        Some(n) if n == 0.0 => Ok(DEFAULT_SCROLL_AMOUNT),
        Some(n) if n < 0.0 => Err(ValidationError::invalid(
            "scroll_amount",
            "must not be negative",
        )),
        Some(n) => Ok(n),
    }
}

/// Effective wait in seconds: absent, non-positive or sub-second requests
/// wait the minimum; anything longer is capped.
pub fn effective_wait_secs(requested: Option<f64>) -> f64 {
    match requested {
        Some(secs) if secs.is_finite() => secs.clamp(MIN_WAIT_SECS, MAX_WAIT_SECS),
        _ => MIN_WAIT_SECS,
    }
}

/// Maps the model-facing key name to the sandbox key name.
pub fn sandbox_key(key: &str) -> &str {
    if key == "Return" { "enter" } else { key }
}

/// `computer_use` tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputerUseTool;

#[async_trait]
impl Tool for ComputerUseTool {
    type Args = ComputerAction;

    fn schema(&self) -> &'static ToolSchema {
        &SCHEMA
    }

    fn validate(&self, raw: &serde_json::Value) -> Result<ComputerAction, ValidationError> {
        ComputerAction::parse(raw)
    }

    async fn dispatch(
        &self,
        sandbox: &dyn Sandbox,
        args: ComputerAction,
    ) -> Result<ToolPayload, SandboxError> {
        debug!(action = %args.action(), "Dispatching computer_use");
        let text = match args {
            ComputerAction::Screenshot => {
                let png = sandbox.capture().await?;
                return Ok(ToolPayload::Image(png));
            }
            ComputerAction::Wait { seconds } => {
                let secs = effective_wait_secs(seconds);
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                format!("Waited for {} seconds", format_number(secs))
            }
            ComputerAction::Click { kind, at } => {
                sandbox.move_mouse(at.x, at.y).await?;
                match kind {
                    ClickKind::Left => sandbox.left_click().await?,
                    ClickKind::Right => sandbox.right_click().await?,
                    ClickKind::Double => sandbox.double_click().await?,
                }
                format!("{} clicked at {at}", kind.label())
            }
            ComputerAction::MouseMove { to } => {
                sandbox.move_mouse(to.x, to.y).await?;
                format!("Moved mouse to {to}")
            }
            ComputerAction::Type { text } => {
                sandbox.write(&text).await?;
                format!("Typed: {text}")
            }
            ComputerAction::Key { key } => {
                sandbox.press(sandbox_key(&key)).await?;
                format!("Pressed key: {key}")
            }
            ComputerAction::Scroll { direction, amount } => {
                sandbox.scroll(direction, amount).await?;
                format!(
                    "Scrolled {direction} by {} clicks",
                    format_number(amount)
                )
            }
            ComputerAction::Drag { from, to } => {
                sandbox.drag(from, to).await?;
                format!("Dragged from ({from}) to ({to})")
            }
        };
        Ok(ToolPayload::Text(text))
    }
}
