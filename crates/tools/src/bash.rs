//! `bash_command` tool.

use async_trait::async_trait;
use proto::{SandboxError, ToolPayload, ValidationError};
use tracing::debug;

use crate::Tool;
use crate::sandbox::{CommandOutput, Sandbox};
use crate::schema::{FieldKind, FieldSpec, Fields, ToolSchema};

/// Result text when the command printed nothing on either stream.
pub const NO_OUTPUT: &str = "(Command executed successfully with no output)";

static SCHEMA: ToolSchema = ToolSchema {
    name: "bash_command",
    description: "Execute bash commands on the computer",
    fields: &[FieldSpec {
        name: "command",
        kind: FieldKind::String,
        required: true,
        description: "The bash command to execute",
    }],
};

/// Validated `bash_command` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BashArgs {
    pub command: String,
}

/// Tool that runs shell commands inside the sandbox
#[derive(Debug, Clone, Copy, Default)]
pub struct BashCommandTool;

#[async_trait]
impl Tool for BashCommandTool {
    type Args = BashArgs;

    fn schema(&self) -> &'static ToolSchema {
        &SCHEMA
    }

    fn validate(&self, raw: &serde_json::Value) -> Result<BashArgs, ValidationError> {
        let fields = Fields::new(SCHEMA.name, raw)?;
        let command = fields
            .string("command")?
            .ok_or_else(|| ValidationError::missing("command", SCHEMA.name))?;
        Ok(BashArgs {
            command: command.to_string(),
        })
    }

    async fn dispatch(
        &self,
        sandbox: &dyn Sandbox,
        args: BashArgs,
    ) -> Result<ToolPayload, SandboxError> {
        debug!("Executing bash command: {}", args.command);
        let output = sandbox.run(&args.command).await?;
        Ok(ToolPayload::Text(select_output(output)))
    }
}

/// Picks stdout, then stderr, then the no-output marker.
fn select_output(output: CommandOutput) -> String {
    if !output.stdout.is_empty() {
        output.stdout
    } else if !output.stderr.is_empty() {
        output.stderr
    } else {
        NO_OUTPUT.to_string()
    }
}
