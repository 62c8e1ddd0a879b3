//! Tool framework: registry, dispatcher, and the approval protocol.
//!
//! Every tool honors the same two-phase protocol:
//!
//! - invoked with `partial = true` once per streamed delta: no side effect,
//!   only report the forming parameters to the approval UI;
//! - invoked once with `partial = false` for final execution: check the
//!   auto-approval predicate, otherwise block on a human yes/no/feedback
//!   response, then perform the side effect.
//!
//! Handler failures never propagate as errors to the orchestrator: the
//! dispatcher converts them into textual responses appended to conversation
//! content, because the model needs to see the failure to recover.

pub mod browser;
pub mod command;
pub mod explore;
pub mod file;
pub mod interact;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures_util::future::BoxFuture;

use scribe_types::{
    AskKind, AskResponse, AutoApprovalSettings, SayKind, ToolParamName, ToolParams, ToolUseName,
};

pub use browser::BrowserSession;

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<ToolResponse, ToolError>> + Send + 'a>>;

/// Error types for tool execution.
///
/// Validation errors (`MissingParam`, `InvalidParam`) are raised before any
/// side effect; `Execution` covers runtime failures after validation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("missing required parameter '{param}' for tool '{tool}'")]
    MissingParam {
        tool: ToolUseName,
        param: ToolParamName,
    },
    #[error("invalid parameter '{param}' for tool '{tool}': {message}")]
    InvalidParam {
        tool: ToolUseName,
        param: ToolParamName,
        message: String,
    },
    #[error("{message}")]
    Execution { tool: ToolUseName, message: String },
    #[error("duplicate tool registered: {name}")]
    DuplicateTool { name: ToolUseName },
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },
    /// The UI/persistence layer failed while the tool was talking to the
    /// human. Propagated, not converted: the task cannot safely continue.
    #[error("interaction failed: {0}")]
    Interaction(String),
    #[error("task aborted")]
    Aborted,
}

impl ToolError {
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ToolError::MissingParam { .. } | ToolError::InvalidParam { .. }
        )
    }
}

/// What a tool hands back to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolResponse {
    pub text: String,
    pub images: Vec<String>,
    /// The user denied this action (with or without feedback). The
    /// orchestrator skips the remaining tool blocks of the turn.
    pub rejected: bool,
    /// Set by the dispatcher when the response describes a parameter
    /// validation failure; feeds the orchestrator's mistake counter.
    pub invalid_params: bool,
}

impl ToolResponse {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
            rejected: false,
            invalid_params: false,
        }
    }

    #[must_use]
    pub fn rejected(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
            rejected: true,
            invalid_params: false,
        }
    }

    /// Empty response; from `attempt_completion` it signals task success.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The seam through which tools talk to the human.
///
/// Implemented by the task orchestrator: asks and says are recorded as UI
/// messages and forwarded to the front end. A `partial = true` ask never
/// blocks — it only updates the forming approval prompt.
pub trait UserInteraction: Send + Sync {
    fn ask<'a>(
        &'a self,
        kind: AskKind,
        text: String,
        partial: bool,
    ) -> BoxFuture<'a, Result<AskResponse, ToolError>>;

    fn say<'a>(
        &'a self,
        kind: SayKind,
        text: Option<String>,
        images: Option<Vec<String>>,
        partial: bool,
    ) -> BoxFuture<'a, Result<(), ToolError>>;
}

/// Tracks the consecutive auto-approval count against the configured cap.
#[derive(Debug)]
pub struct ApprovalGate {
    settings: AutoApprovalSettings,
    consecutive: AtomicU32,
}

impl ApprovalGate {
    #[must_use]
    pub fn new(settings: AutoApprovalSettings) -> Self {
        Self {
            settings,
            consecutive: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn should_auto_approve(&self, tool: ToolUseName) -> bool {
        self.settings.allows(tool)
    }

    pub fn record_auto_approval(&self) {
        self.consecutive.fetch_add(1, Ordering::SeqCst);
    }

    /// A manual approval breaks the consecutive run.
    pub fn reset(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    #[must_use]
    pub fn limit_reached(&self) -> bool {
        self.settings.enabled
            && self.consecutive.load(Ordering::SeqCst) >= self.settings.max_requests
    }
}

/// Per-task context handed to every tool invocation.
pub struct ToolContext {
    pub cwd: PathBuf,
    pub ui: Arc<dyn UserInteraction>,
    pub approval: Arc<ApprovalGate>,
}

/// A registered tool.
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolUseName;

    /// Execute or (for `partial = true`) preview the invocation.
    fn execute<'a>(&'a self, ctx: &'a ToolContext, params: &'a ToolParams, partial: bool)
    -> ToolFut<'a>;

    /// Force-release externally held resources (terminals, browsers) when
    /// the task is cancelled mid-tool.
    fn abort<'a>(&'a self) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Maps tool names to handlers and enforces the dispatch contract.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<ToolUseName, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Execute a tool by name.
    ///
    /// Validation and execution failures come back as `Ok` textual
    /// responses — conversation content for the model — and are
    /// distinguishable in the text. Only [`ToolError::Aborted`] propagates.
    pub async fn dispatch(
        &self,
        ctx: &ToolContext,
        name: ToolUseName,
        params: &ToolParams,
        partial: bool,
    ) -> Result<ToolResponse, ToolError> {
        let Some(tool) = self.tools.get(&name) else {
            return Ok(ToolResponse::text(format!(
                "Error: tool '{name}' is not available."
            )));
        };

        match tool.execute(ctx, params, partial).await {
            Ok(response) => Ok(response),
            Err(e @ (ToolError::Aborted | ToolError::Interaction(_))) => Err(e),
            Err(e) if e.is_validation() => Ok(ToolResponse {
                text: format!("Error: invalid parameters for tool '{name}': {e}"),
                images: Vec::new(),
                rejected: false,
                invalid_params: true,
            }),
            Err(e) => Ok(ToolResponse::text(format!(
                "Error executing tool '{name}': {e}"
            ))),
        }
    }

    /// Invoke every registered tool's abort hook.
    pub async fn abort_all(&self) {
        for tool in self.tools.values() {
            tool.abort().await;
        }
    }

    #[must_use]
    pub fn contains(&self, name: ToolUseName) -> bool {
        self.tools.contains_key(&name)
    }
}

/// Fetch a required parameter.
pub(crate) fn require_param<'a>(
    tool: ToolUseName,
    params: &'a ToolParams,
    param: ToolParamName,
) -> Result<&'a str, ToolError> {
    params
        .get(&param)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or(ToolError::MissingParam { tool, param })
}

/// Fetch an optional boolean parameter ("true"/"false").
pub(crate) fn optional_bool_param(
    tool: ToolUseName,
    params: &ToolParams,
    param: ToolParamName,
) -> Result<bool, ToolError> {
    match params.get(&param).map(String::as_str) {
        None | Some("") => Ok(false),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(ToolError::InvalidParam {
            tool,
            param,
            message: format!("expected 'true' or 'false', got '{other}'"),
        }),
    }
}

/// How the approval gate resolved a pending side effect.
pub(crate) enum Approval {
    Approved,
    AutoApproved,
    Denied,
    DeniedWithFeedback { text: String, images: Vec<String> },
}

/// Run the approval protocol for a final (non-partial) invocation.
pub(crate) async fn request_approval(
    ctx: &ToolContext,
    tool: ToolUseName,
    ask_kind: AskKind,
    message: String,
) -> Result<Approval, ToolError> {
    if ctx.approval.should_auto_approve(tool) {
        ctx.ui
            .say(SayKind::Tool, Some(message), None, false)
            .await?;
        ctx.approval.record_auto_approval();
        return Ok(Approval::AutoApproved);
    }

    match ctx.ui.ask(ask_kind, message, false).await? {
        AskResponse::Yes => {
            ctx.approval.reset();
            Ok(Approval::Approved)
        }
        AskResponse::No => {
            ctx.approval.reset();
            Ok(Approval::Denied)
        }
        AskResponse::Message { text, images } => {
            ctx.approval.reset();
            ctx.ui
                .say(
                    SayKind::UserFeedback,
                    Some(text.clone()),
                    Some(images.clone()),
                    false,
                )
                .await?;
            Ok(Approval::DeniedWithFeedback { text, images })
        }
    }
}

/// Surface the forming invocation during streaming. Never side-effects.
pub(crate) async fn present_partial(
    ctx: &ToolContext,
    tool: ToolUseName,
    ask_kind: AskKind,
    message: String,
) -> Result<(), ToolError> {
    if ctx.approval.should_auto_approve(tool) {
        ctx.ui.say(SayKind::Tool, Some(message), None, true).await
    } else {
        ctx.ui.ask(ask_kind, message, true).await.map(|_| ())
    }
}

pub(crate) fn denied_response(action: &str) -> ToolResponse {
    ToolResponse::rejected(format!("The user denied this operation: {action}"))
}

pub(crate) fn denied_with_feedback_response(action: &str, feedback: &str) -> ToolResponse {
    ToolResponse::rejected(format!(
        "The user denied this operation: {action}\nFeedback: {feedback}"
    ))
}
