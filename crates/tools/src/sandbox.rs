//! Sandbox capability interface and a recording implementation.
//!
//! The concrete desktop sandbox (screen capture, input injection, process
//! execution) lives outside this workspace; dispatch only talks to it through
//! [`Sandbox`].

use async_trait::async_trait;
use parking_lot::Mutex;
use proto::SandboxError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::format_number;

/// Screen position in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", format_number(self.x), format_number(self.y))
    }
}

/// Wheel direction for scroll actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    /// Accepted wire values.
    pub const NAMES: &'static [&'static str] = &["up", "down"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl std::fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScrollDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(format!("expected one of up, down; got {other:?}")),
        }
    }
}

/// Captured output of a shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Operations the dispatch server needs from a desktop sandbox.
///
/// Every method may block on the external sandbox and may fail.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Captures the screen as PNG bytes.
    async fn capture(&self) -> Result<Vec<u8>, SandboxError>;
    /// Moves the pointer.
    async fn move_mouse(&self, x: f64, y: f64) -> Result<(), SandboxError>;
    async fn left_click(&self) -> Result<(), SandboxError>;
    async fn right_click(&self) -> Result<(), SandboxError>;
    async fn double_click(&self) -> Result<(), SandboxError>;
    /// Types text.
    async fn write(&self, text: &str) -> Result<(), SandboxError>;
    /// Presses a named key (`enter`, `ctrl+c`, ...).
    async fn press(&self, key: &str) -> Result<(), SandboxError>;
    async fn scroll(&self, direction: ScrollDirection, amount: f64) -> Result<(), SandboxError>;
    /// Drags with the left button held from `start` to `end`.
    async fn drag(&self, start: Point, end: Point) -> Result<(), SandboxError>;
    /// Runs a shell command and waits for it.
    async fn run(&self, command: &str) -> Result<CommandOutput, SandboxError>;
}

/// One capability call as observed by [`RecordingSandbox`].
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxCall {
    Capture,
    MoveMouse(Point),
    LeftClick,
    RightClick,
    DoubleClick,
    Write(String),
    Press(String),
    Scroll(ScrollDirection, f64),
    Drag(Point, Point),
    Run(String),
}

impl SandboxCall {
    /// Operation name used in logs and injected failures.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::MoveMouse(_) => "move_mouse",
            Self::LeftClick => "left_click",
            Self::RightClick => "right_click",
            Self::DoubleClick => "double_click",
            Self::Write(_) => "write",
            Self::Press(_) => "press",
            Self::Scroll(..) => "scroll",
            Self::Drag(..) => "drag",
            Self::Run(_) => "run",
        }
    }
}

/// Sandbox that performs nothing and records every call in order.
///
/// Used for dry runs from the CLI and as the capability stub in tests.
#[derive(Debug, Default)]
pub struct RecordingSandbox {
    calls: Mutex<Vec<SandboxCall>>,
    capture: Vec<u8>,
    output: CommandOutput,
    fail_on: Option<&'static str>,
}

impl RecordingSandbox {
    /// Creates a sandbox with an empty capture and no command output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes returned by `capture`.
    pub fn with_capture(mut self, png: Vec<u8>) -> Self {
        self.capture = png;
        self
    }

    /// Output returned by `run`.
    pub fn with_command_output(mut self, output: CommandOutput) -> Self {
        self.output = output;
        self
    }

    /// Makes the named operation fail after it is recorded.
    pub fn failing_on(mut self, operation: &'static str) -> Self {
        self.fail_on = Some(operation);
        self
    }

    /// Snapshot of calls recorded so far.
    pub fn calls(&self) -> Vec<SandboxCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: SandboxCall) -> Result<(), SandboxError> {
        let operation = call.operation();
        debug!(operation, ?call, "Recording sandbox call");
        self.calls.lock().push(call);
        match self.fail_on {
            Some(failing) if failing == operation => {
                Err(SandboxError::operation(operation, "injected failure"))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Sandbox for RecordingSandbox {
    async fn capture(&self) -> Result<Vec<u8>, SandboxError> {
        self.record(SandboxCall::Capture)?;
        Ok(self.capture.clone())
    }

    async fn move_mouse(&self, x: f64, y: f64) -> Result<(), SandboxError> {
        self.record(SandboxCall::MoveMouse(Point::new(x, y)))
    }

    async fn left_click(&self) -> Result<(), SandboxError> {
        self.record(SandboxCall::LeftClick)
    }

    async fn right_click(&self) -> Result<(), SandboxError> {
        self.record(SandboxCall::RightClick)
    }

    async fn double_click(&self) -> Result<(), SandboxError> {
        self.record(SandboxCall::DoubleClick)
    }

    async fn write(&self, text: &str) -> Result<(), SandboxError> {
        self.record(SandboxCall::Write(text.to_string()))
    }

    async fn press(&self, key: &str) -> Result<(), SandboxError> {
        self.record(SandboxCall::Press(key.to_string()))
    }

    async fn scroll(&self, direction: ScrollDirection, amount: f64) -> Result<(), SandboxError> {
        self.record(SandboxCall::Scroll(direction, amount))
    }

    async fn drag(&self, start: Point, end: Point) -> Result<(), SandboxError> {
        self.record(SandboxCall::Drag(start, end))
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, SandboxError> {
        self.record(SandboxCall::Run(command.to_string()))?;
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_display_drops_integral_fraction() {
        assert_eq!(Point::new(100.0, 200.0).to_string(), "100, 200");
        assert_eq!(Point::new(1.5, -3.0).to_string(), "1.5, -3");
    }

    #[test]
    fn scroll_direction_parses_only_up_and_down() {
        assert_eq!("up".parse::<ScrollDirection>(), Ok(ScrollDirection::Up));
        assert_eq!("down".parse::<ScrollDirection>(), Ok(ScrollDirection::Down));
        assert!("left".parse::<ScrollDirection>().is_err());
    }

    #[tokio::test]
    async fn recording_sandbox_keeps_call_order() {
        let sandbox = RecordingSandbox::new()
            .with_command_output(CommandOutput::new("hi\n", ""))
            .with_capture(vec![1, 2]);

        sandbox.move_mouse(1.0, 2.0).await.expect("move");
        sandbox.left_click().await.expect("click");
        let shot = sandbox.capture().await.expect("capture");
        let out = sandbox.run("echo hi").await.expect("run");

        assert_eq!(shot, vec![1, 2]);
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(
            sandbox.calls(),
            vec![
                SandboxCall::MoveMouse(Point::new(1.0, 2.0)),
                SandboxCall::LeftClick,
                SandboxCall::Capture,
                SandboxCall::Run("echo hi".into()),
            ]
        );
    }

    #[tokio::test]
    async fn recording_sandbox_injects_failure_for_named_operation() {
        let sandbox = RecordingSandbox::new().failing_on("press");
        sandbox.write("abc").await.expect("write is unaffected");
        let err = sandbox.press("enter").await.expect_err("press should fail");
        assert_eq!(err, SandboxError::operation("press", "injected failure"));
        assert_eq!(sandbox.calls().len(), 2);
    }
}
