//! Tool contracts and dispatch onto a desktop sandbox.
//!
//! Exposes the action schema registry, the sandbox capability interface and
//! the two built-in tools, `computer_use` and `bash_command`.

pub mod bash;
pub mod computer;
pub mod sandbox;
pub mod schema;

pub use bash::{BashArgs, BashCommandTool};
pub use computer::{Action, ClickKind, ComputerAction, ComputerUseTool};
pub use sandbox::{CommandOutput, Point, RecordingSandbox, Sandbox, SandboxCall, ScrollDirection};
pub use schema::{FieldKind, FieldSpec, ToolKind, ToolSchema, ValidatedArgs, describe, validate};

use async_trait::async_trait;
use proto::{SandboxError, ToolPayload, ValidationError};

/// Trait that all tools must implement
///
/// Validation is pure; only [`Tool::dispatch`] touches the sandbox, so a
/// rejected call never produces a side effect.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Typed arguments produced by validation.
    type Args: Send + 'static;

    /// Static contract of this tool.
    fn schema(&self) -> &'static ToolSchema;

    /// Checks raw arguments against the schema.
    fn validate(&self, raw: &serde_json::Value) -> Result<Self::Args, ValidationError>;

    /// Performs the validated call against the sandbox.
    async fn dispatch(
        &self,
        sandbox: &dyn Sandbox,
        args: Self::Args,
    ) -> Result<ToolPayload, SandboxError>;
}

impl ValidatedArgs {
    /// Dispatches onto the owning tool.
    pub async fn dispatch(self, sandbox: &dyn Sandbox) -> Result<ToolPayload, SandboxError> {
        match self {
            Self::Computer(action) => ComputerUseTool.dispatch(sandbox, action).await,
            Self::Bash(args) => BashCommandTool.dispatch(sandbox, args).await,
        }
    }
}

/// Formats a number without a trailing `.0` when it is integral.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
