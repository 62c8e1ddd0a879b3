//! Conversational tools: followup questions and task completion.

use std::sync::Arc;

use scribe_terminal::{TerminalEvent, TerminalManager};
use scribe_types::{AskKind, AskResponse, SayKind, ToolParamName, ToolParams, ToolUseName};

use crate::{
    Approval, Tool, ToolContext, ToolFut, ToolResponse, present_partial, request_approval,
    require_param,
};

pub struct AskFollowupQuestionTool;

impl Tool for AskFollowupQuestionTool {
    fn name(&self) -> ToolUseName {
        ToolUseName::AskFollowupQuestion
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ToolContext,
        params: &'a ToolParams,
        partial: bool,
    ) -> ToolFut<'a> {
        Box::pin(async move {
            let tool = self.name();
            let question_param = params
                .get(&ToolParamName::Question)
                .cloned()
                .unwrap_or_default();

            if partial {
                present_partial(ctx, tool, AskKind::Followup, question_param).await?;
                return Ok(ToolResponse::empty());
            }

            let question = require_param(tool, params, ToolParamName::Question)?;
            let answer = ctx
                .ui
                .ask(AskKind::Followup, question.to_string(), false)
                .await?;

            match answer {
                AskResponse::Message { text, images } => {
                    ctx.ui
                        .say(
                            SayKind::UserFeedback,
                            Some(text.clone()),
                            Some(images.clone()),
                            false,
                        )
                        .await?;
                    Ok(ToolResponse {
                        text: format!("<answer>\n{text}\n</answer>"),
                        images,
                        rejected: false,
                        invalid_params: false,
                    })
                }
                // A bare yes/no without text gives the model nothing to work
                // with; say so rather than inventing an answer.
                AskResponse::Yes | AskResponse::No => Ok(ToolResponse::text(
                    "The user did not provide an answer to the question.",
                )),
            }
        })
    }
}

pub struct AttemptCompletionTool {
    terminals: Arc<TerminalManager>,
}

impl AttemptCompletionTool {
    #[must_use]
    pub fn new(terminals: Arc<TerminalManager>) -> Self {
        Self { terminals }
    }

    /// Run the optional demo command after the result is presented.
    async fn run_demo_command(
        &self,
        ctx: &ToolContext,
        command: &str,
    ) -> Result<Option<ToolResponse>, crate::ToolError> {
        match request_approval(
            ctx,
            ToolUseName::ExecuteCommand,
            AskKind::Command,
            command.to_string(),
        )
        .await?
        {
            Approval::Approved | Approval::AutoApproved => {}
            Approval::Denied => return Ok(None),
            Approval::DeniedWithFeedback { text, .. } => {
                return Ok(Some(ToolResponse::rejected(format!(
                    "The user declined to run the demonstration command.\nFeedback: {text}"
                ))));
            }
        }

        let info = self.terminals.get_or_create_terminal(&ctx.cwd);
        if let Ok(mut handle) = self.terminals.run_command(info.id, command) {
            while let Some(event) = handle.next_event().await {
                match event {
                    TerminalEvent::Line(line) => {
                        ctx.ui
                            .say(SayKind::CommandOutput, Some(line), None, true)
                            .await?;
                    }
                    TerminalEvent::NoShellIntegration | TerminalEvent::Completed { .. } => break,
                }
            }
        }
        Ok(None)
    }
}

impl Tool for AttemptCompletionTool {
    fn name(&self) -> ToolUseName {
        ToolUseName::AttemptCompletion
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ToolContext,
        params: &'a ToolParams,
        partial: bool,
    ) -> ToolFut<'a> {
        Box::pin(async move {
            let tool = self.name();
            let result_param = params
                .get(&ToolParamName::Result)
                .cloned()
                .unwrap_or_default();

            if partial {
                ctx.ui
                    .say(SayKind::CompletionResult, Some(result_param), None, true)
                    .await?;
                return Ok(ToolResponse::empty());
            }

            let result = require_param(tool, params, ToolParamName::Result)?;
            ctx.ui
                .say(SayKind::CompletionResult, Some(result.to_string()), None, false)
                .await?;

            if let Some(command) = params.get(&ToolParamName::Command)
                && !command.is_empty()
                && let Some(early) = self.run_demo_command(ctx, command).await?
            {
                return Ok(early);
            }

            // Empty ask: "accept or give feedback". An empty response means
            // the user is satisfied and the task is complete.
            let response = ctx
                .ui
                .ask(AskKind::CompletionResult, String::new(), false)
                .await?;
            match response {
                AskResponse::Yes | AskResponse::No => Ok(ToolResponse::empty()),
                AskResponse::Message { text, images } => {
                    ctx.ui
                        .say(
                            SayKind::UserFeedback,
                            Some(text.clone()),
                            Some(images.clone()),
                            false,
                        )
                        .await?;
                    Ok(ToolResponse {
                        text: format!(
                            "The user has provided feedback on the results. Consider their input to continue the task, then attempt completion again.\n<feedback>\n{text}\n</feedback>"
                        ),
                        images,
                        rejected: false,
                        invalid_params: false,
                    })
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use scribe_terminal::{TerminalManager, detect_shell};
    use scribe_types::{
        AskResponse, AutoApprovalSettings, ToolParamName, ToolParams, ToolUseName,
    };

    use crate::testing::ScriptedUi;
    use crate::{ApprovalGate, Tool, ToolContext};

    use super::{AskFollowupQuestionTool, AttemptCompletionTool};

    fn ctx(ui: Arc<ScriptedUi>) -> ToolContext {
        ToolContext {
            cwd: std::env::temp_dir(),
            ui,
            approval: Arc::new(ApprovalGate::new(AutoApprovalSettings::default())),
        }
    }

    fn completion_tool() -> AttemptCompletionTool {
        AttemptCompletionTool::new(Arc::new(TerminalManager::new(detect_shell(None))))
    }

    #[tokio::test]
    async fn followup_returns_the_answer() {
        let ui = Arc::new(ScriptedUi::answering(vec![AskResponse::Message {
            text: "use port 8080".to_string(),
            images: vec![],
        }]));
        let params: ToolParams = [(ToolParamName::Question, "which port?".to_string())]
            .into_iter()
            .collect();
        let response = AskFollowupQuestionTool
            .execute(&ctx(ui), &params, false)
            .await
            .unwrap();
        assert!(response.text.contains("use port 8080"));
        assert!(!response.rejected);
    }

    #[tokio::test]
    async fn followup_without_question_is_validation_error() {
        let ui = Arc::new(ScriptedUi::default());
        let err = AskFollowupQuestionTool
            .execute(&ctx(ui), &ToolParams::new(), false)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn accepted_completion_returns_empty_response() {
        let ui = Arc::new(ScriptedUi::answering(vec![AskResponse::Yes]));
        let params: ToolParams = [(ToolParamName::Result, "All done.".to_string())]
            .into_iter()
            .collect();
        let response = completion_tool()
            .execute(&ctx(ui), &params, false)
            .await
            .unwrap();
        assert!(response.text.is_empty());
    }

    #[tokio::test]
    async fn completion_feedback_loops_back_to_the_model() {
        let ui = Arc::new(ScriptedUi::answering(vec![AskResponse::Message {
            text: "the tests still fail".to_string(),
            images: vec![],
        }]));
        let params: ToolParams = [(ToolParamName::Result, "All done.".to_string())]
            .into_iter()
            .collect();
        let response = completion_tool()
            .execute(&ctx(ui), &params, false)
            .await
            .unwrap();
        assert!(response.text.contains("the tests still fail"));
        assert!(response.text.contains("<feedback>"));
    }

    #[test]
    fn names_match_grammar() {
        assert_eq!(
            AskFollowupQuestionTool.name(),
            ToolUseName::AskFollowupQuestion
        );
        assert_eq!(completion_tool().name(), ToolUseName::AttemptCompletion);
    }
}
