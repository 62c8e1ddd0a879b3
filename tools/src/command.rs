//! Shell command execution through the terminal manager.

use std::sync::Arc;

use scribe_terminal::{TerminalEvent, TerminalManager};
use scribe_types::{AskKind, SayKind, ToolParamName, ToolParams, ToolUseName};

use crate::{
    Approval, Tool, ToolContext, ToolFut, ToolResponse, denied_response,
    denied_with_feedback_response, present_partial, request_approval, require_param,
};

pub struct ExecuteCommandTool {
    terminals: Arc<TerminalManager>,
}

impl ExecuteCommandTool {
    #[must_use]
    pub fn new(terminals: Arc<TerminalManager>) -> Self {
        Self { terminals }
    }
}

impl Tool for ExecuteCommandTool {
    fn name(&self) -> ToolUseName {
        ToolUseName::ExecuteCommand
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ToolContext,
        params: &'a ToolParams,
        partial: bool,
    ) -> ToolFut<'a> {
        Box::pin(async move {
            let tool = self.name();
            let command_param = params
                .get(&ToolParamName::Command)
                .cloned()
                .unwrap_or_default();

            if partial {
                present_partial(ctx, tool, AskKind::Command, command_param).await?;
                return Ok(ToolResponse::empty());
            }

            let command = require_param(tool, params, ToolParamName::Command)?;

            match request_approval(ctx, tool, AskKind::Command, command.to_string()).await? {
                Approval::Approved | Approval::AutoApproved => {}
                Approval::Denied => return Ok(denied_response(&format!("run `{command}`"))),
                Approval::DeniedWithFeedback { text, .. } => {
                    return Ok(denied_with_feedback_response(
                        &format!("run `{command}`"),
                        &text,
                    ));
                }
            }

            let info = self.terminals.get_or_create_terminal(&ctx.cwd);
            let mut handle = match self.terminals.run_command(info.id, command) {
                Ok(handle) => handle,
                Err(e) => {
                    return Ok(ToolResponse::text(format!(
                        "Error: could not start command `{command}`: {e}"
                    )));
                }
            };

            let mut lines: Vec<String> = Vec::new();
            let mut exit_code: Option<i32> = None;
            let mut shell_integration = true;

            while let Some(event) = handle.next_event().await {
                match event {
                    TerminalEvent::Line(line) => {
                        lines.push(line);
                        // Stream the accumulated log; partial says update
                        // the same UI entry in place.
                        ctx.ui
                            .say(SayKind::CommandOutput, Some(lines.join("\n")), None, true)
                            .await?;
                    }
                    TerminalEvent::NoShellIntegration => {
                        shell_integration = false;
                        break;
                    }
                    TerminalEvent::Completed { exit_code: code } => {
                        exit_code = code;
                        break;
                    }
                }
            }
            if !lines.is_empty() {
                ctx.ui
                    .say(SayKind::CommandOutput, Some(lines.join("\n")), None, false)
                    .await?;
            }

            if !shell_integration {
                return Ok(ToolResponse::text(format!(
                    "Command `{command}` was sent to the terminal, but its output could not be captured (no shell integration available). Assume it ran; verify its effects with other tools if needed."
                )));
            }

            let output = lines.join("\n");
            let status = match exit_code {
                Some(0) | None => String::new(),
                Some(code) => format!(" (exit code {code})"),
            };
            let body = if output.is_empty() {
                "(no output)".to_string()
            } else {
                format!("Output:\n{output}")
            };
            Ok(ToolResponse::text(format!(
                "Command executed{status}.\n{body}"
            )))
        })
    }

    fn abort<'a>(&'a self) -> futures_util::future::BoxFuture<'a, ()> {
        Box::pin(async move {
            // Force-release every session; the task is tearing down.
            self.terminals.dispose_all();
        })
    }
}
