//! The task state machine and control loop.
//!
//! One task drives the request/response/tool-execution cycle on a single
//! cooperative flow: build the system prompt, truncate history near the
//! context limit, stream a model turn, feed parsed blocks to the tool
//! dispatcher in strict index order, collect user feedback, and loop until
//! `attempt_completion` or abort. Every ask/say boundary and every stream
//! read checks the abort flag.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};

use scribe_providers::ModelProvider;
use scribe_terminal::TerminalManager;
use scribe_tools::{ApprovalGate, ToolContext, ToolError, ToolRegistry, UserInteraction};
use scribe_types::{
    ApiUsage, AskKind, AskResponse, AssistantBlock, ContentPart, ConversationMessage,
    MessageWithTokenCount, ProviderEvent, SayKind, TaskId, ToolParamName, ToolUseBlock,
    ToolUseName, UiMessage, calculate_api_cost, truncate_with_ellipsis,
};

use crate::assistant_message::parse_assistant_message;
use crate::environment::EnvironmentInspector;
use crate::persistence::TaskStore;
use crate::sliding_window::{should_truncate, truncate_half_conversation};
use crate::{FrontEnd, TaskError, prompt};

const STREAM_EVENT_CHANNEL_CAPACITY: usize = 256;
/// Bounded retries for a failed stream establishment; each retry sits
/// behind a human approval gate.
const MAX_STREAM_ATTEMPTS: u32 = 3;
const CONSECUTIVE_MISTAKE_LIMIT: u32 = 3;

const NO_TOOL_USED_PROMPT: &str = "[ERROR] You did not use a tool in your previous response. Every reply must use exactly one tool; use attempt_completion if the task is done, or ask_followup_question if you need more information.";

/// Observable lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Idle,
    AwaitingModel,
    PresentingBlocks,
    AwaitingToolApproval,
    AwaitingUserInput,
    Completed,
    Aborted,
}

/// Everything a task needs injected at construction.
pub struct TaskDeps {
    pub provider: Arc<dyn ModelProvider>,
    pub registry: Arc<ToolRegistry>,
    pub approval: Arc<ApprovalGate>,
    pub terminals: Arc<TerminalManager>,
    pub front_end: Arc<dyn FrontEnd>,
    pub store: TaskStore,
    pub cwd: PathBuf,
    pub shell_name: String,
    pub custom_instructions: Option<String>,
}

/// Cancels a running task from outside its control flow.
#[derive(Clone)]
pub struct TaskAbortHandle {
    abort_tx: Arc<watch::Sender<bool>>,
    registry: Arc<ToolRegistry>,
    terminals: Arc<TerminalManager>,
}

impl TaskAbortHandle {
    /// Flag the task as aborted, fail any in-flight ask, and force-release
    /// tool resources.
    pub async fn abort(&self) {
        let _ = self.abort_tx.send(true);
        self.registry.abort_all().await;
        self.terminals.dispose_all();
    }
}

struct TaskState {
    status: TaskStatus,
    ui_messages: Vec<UiMessage>,
    api_history: Vec<MessageWithTokenCount>,

    // Per-turn streaming state.
    assistant_text: String,
    blocks: Vec<AssistantBlock>,
    current_block_index: usize,
    did_complete_reading_stream: bool,
    did_already_use_tool: bool,
    did_reject_tool: bool,
    did_edit_file: bool,
    user_message_content: Vec<ContentPart>,
    user_message_content_ready: bool,
    present_locked: bool,
    present_pending: bool,

    consecutive_mistakes: u32,
    last_request_usage: Option<ApiUsage>,
    completed: bool,
}

impl TaskState {
    fn new(ui_messages: Vec<UiMessage>, api_history: Vec<MessageWithTokenCount>) -> Self {
        Self {
            status: TaskStatus::Idle,
            ui_messages,
            api_history,
            assistant_text: String::new(),
            blocks: Vec::new(),
            current_block_index: 0,
            did_complete_reading_stream: false,
            did_already_use_tool: false,
            did_reject_tool: false,
            did_edit_file: false,
            user_message_content: Vec::new(),
            user_message_content_ready: false,
            present_locked: false,
            present_pending: false,
            consecutive_mistakes: 0,
            last_request_usage: None,
            completed: false,
        }
    }

    fn reset_turn(&mut self) {
        self.assistant_text.clear();
        self.blocks.clear();
        self.current_block_index = 0;
        self.did_complete_reading_stream = false;
        self.did_already_use_tool = false;
        self.did_reject_tool = false;
        self.user_message_content.clear();
        self.user_message_content_ready = false;
    }
}

pub struct Task {
    id: TaskId,
    cwd: PathBuf,
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    approval: Arc<ApprovalGate>,
    terminals: Arc<TerminalManager>,
    front_end: Arc<dyn FrontEnd>,
    store: TaskStore,
    env: EnvironmentInspector,
    base_prompt: String,
    custom_instructions: Option<String>,
    state: Mutex<TaskState>,
    abort_tx: Arc<watch::Sender<bool>>,
    abort_rx: watch::Receiver<bool>,
    /// Self-handle for passing the task to tools as their UI seam.
    me: Weak<Task>,
}

impl Task {
    /// Start a fresh task.
    #[must_use]
    pub fn new(deps: TaskDeps) -> Arc<Self> {
        Self::build(deps, TaskId::now(), Vec::new(), Vec::new())
    }

    /// Rehydrate a persisted task for resumption.
    pub fn rehydrate(deps: TaskDeps, id: TaskId) -> std::io::Result<Arc<Self>> {
        let ui_messages = deps.store.load_ui_messages(id)?;
        let api_history = deps.store.load_api_history(id)?;
        Ok(Self::build(deps, id, ui_messages, api_history))
    }

    fn build(
        deps: TaskDeps,
        id: TaskId,
        ui_messages: Vec<UiMessage>,
        api_history: Vec<MessageWithTokenCount>,
    ) -> Arc<Self> {
        let (abort_tx, abort_rx) = watch::channel(false);
        let base_prompt = prompt::system_prompt(&deps.cwd, &deps.shell_name);
        let env = EnvironmentInspector::new(deps.cwd.clone(), Arc::clone(&deps.terminals));
        Arc::new_cyclic(|me| Self {
            id,
            cwd: deps.cwd,
            provider: deps.provider,
            registry: deps.registry,
            approval: deps.approval,
            terminals: deps.terminals,
            front_end: deps.front_end,
            store: deps.store,
            env,
            base_prompt,
            custom_instructions: deps.custom_instructions,
            state: Mutex::new(TaskState::new(ui_messages, api_history)),
            abort_tx: Arc::new(abort_tx),
            abort_rx,
            me: me.clone(),
        })
    }

    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.state().status
    }

    #[must_use]
    pub fn ui_messages(&self) -> Vec<UiMessage> {
        self.state().ui_messages.clone()
    }

    #[must_use]
    pub fn api_history(&self) -> Vec<MessageWithTokenCount> {
        self.state().api_history.clone()
    }

    /// Whether any file-editing tool ran during this task.
    #[must_use]
    pub fn did_edit_file(&self) -> bool {
        self.state().did_edit_file
    }

    #[must_use]
    pub fn abort_handle(&self) -> TaskAbortHandle {
        TaskAbortHandle {
            abort_tx: Arc::clone(&self.abort_tx),
            registry: Arc::clone(&self.registry),
            terminals: Arc::clone(&self.terminals),
        }
    }

    /// Run a new task to completion or abort.
    pub async fn run(
        &self,
        task_text: &str,
        images: Vec<String>,
    ) -> Result<(), TaskError> {
        self.say(
            SayKind::Task,
            Some(task_text.to_string()),
            (!images.is_empty()).then(|| images.clone()),
            false,
        )
        .await?;

        let mut content = vec![ContentPart::text(format!("<task>\n{task_text}\n</task>"))];
        content.extend(
            images
                .into_iter()
                .map(|data| ContentPart::image("image/png", strip_data_uri(&data))),
        );
        self.drive(content).await
    }

    /// Continue a rehydrated task: strip stale resume bookkeeping, confirm
    /// with the user, then re-enter the loop.
    pub async fn resume(&self) -> Result<(), TaskError> {
        {
            let mut st = self.state();
            // Earlier resume prompts are stale once we resume again.
            while st
                .ui_messages
                .last()
                .is_some_and(|m| m.is_ask(AskKind::ResumeTask))
            {
                st.ui_messages.pop();
            }
            // An api_req_started entry without recorded metrics marks a
            // request that never finished; drop it.
            if let Some(pos) = st
                .ui_messages
                .iter()
                .rposition(|m| m.is_say(SayKind::ApiReqStarted))
            {
                let has_metrics = st.ui_messages[pos]
                    .text
                    .as_deref()
                    .and_then(|t| serde_json::from_str::<serde_json::Value>(t).ok())
                    .is_some_and(|v| v.get("cost").is_some());
                if !has_metrics {
                    st.ui_messages.remove(pos);
                }
            }
        }
        self.persist_ui()?;

        let response = self
            .ask(
                AskKind::ResumeTask,
                "This task was interrupted. Resume where it left off?".to_string(),
                false,
            )
            .await?;

        let mut content = vec![ContentPart::text(
            "[TASK RESUMPTION] This task was interrupted. The workspace state may have changed since; reassess the context before continuing. The last tool use may not have completed.".to_string(),
        )];
        if let AskResponse::Message { text, images } = response {
            self.say(
                SayKind::UserFeedback,
                Some(text.clone()),
                Some(images.clone()),
                false,
            )
            .await?;
            content.push(ContentPart::text(format!(
                "New instructions for task continuation:\n<user_message>\n{text}\n</user_message>"
            )));
            content.extend(
                images
                    .into_iter()
                    .map(|data| ContentPart::image("image/png", strip_data_uri(&data))),
            );
        }
        self.drive(content).await
    }

    async fn drive(&self, user_content: Vec<ContentPart>) -> Result<(), TaskError> {
        let result = self.request_loop(user_content, true).await;
        {
            let mut st = self.state();
            st.status = match &result {
                Ok(()) => TaskStatus::Completed,
                Err(_) => TaskStatus::Aborted,
            };
        }
        if let Err(e) = &result {
            tracing::warn!(task = %self.id, "task ended without completing: {e}");
            // Force-release held resources on any failed exit.
            self.registry.abort_all().await;
            self.terminals.dispose_all();
        }
        result
    }

    /// The turn cycle: explicit loop, not recursion.
    async fn request_loop(
        &self,
        mut user_content: Vec<ContentPart>,
        mut include_file_details: bool,
    ) -> Result<(), TaskError> {
        loop {
            self.check_abort()?;
            self.mistake_checkpoint(&mut user_content).await?;
            self.auto_approval_checkpoint().await?;

            // Environment details ride along as the final user part.
            let env_details = self.env.snapshot(include_file_details).await;
            let mut content = user_content;
            content.push(ContentPart::text(env_details));

            let request_preview = content
                .iter()
                .map(summarize_part)
                .collect::<Vec<_>>()
                .join("\n");
            self.say(
                SayKind::ApiReqStarted,
                Some(
                    serde_json::json!({
                        "request": truncate_with_ellipsis(&request_preview, 1000)
                    })
                    .to_string(),
                ),
                None,
                false,
            )
            .await?;

            self.maybe_truncate_history()?;
            self.push_api_message(ConversationMessage::user(content))?;

            let usage = self.stream_turn().await?;
            self.record_request_metrics(usage)?;

            let (assistant_text, next_content, tool_used, completed) = {
                let mut st = self.state();
                debug_assert!(st.user_message_content_ready);
                (
                    std::mem::take(&mut st.assistant_text),
                    std::mem::take(&mut st.user_message_content),
                    st.did_already_use_tool,
                    st.completed,
                )
            };

            if assistant_text.is_empty() {
                // The provider signalled success but sent nothing usable.
                self.say(
                    SayKind::Error,
                    Some("Unexpected: the model produced an empty response.".to_string()),
                    None,
                    false,
                )
                .await?;
                self.push_api_message(ConversationMessage::assistant(vec![ContentPart::text(
                    "Failure: no response was produced.",
                )]))?;
            } else {
                self.push_api_message(ConversationMessage::assistant(vec![ContentPart::text(
                    assistant_text,
                )]))?;
            }
            self.backfill_token_counts(usage)?;

            if completed {
                return Ok(());
            }

            user_content = next_content;
            if tool_used {
                self.state().consecutive_mistakes = 0;
            } else {
                user_content.push(ContentPart::text(NO_TOOL_USED_PROMPT));
                self.state().consecutive_mistakes += 1;
            }
            include_file_details = false;
        }
    }

    /// Too many structural mistakes in a row force a human checkpoint.
    async fn mistake_checkpoint(
        &self,
        user_content: &mut Vec<ContentPart>,
    ) -> Result<(), TaskError> {
        if self.state().consecutive_mistakes < CONSECUTIVE_MISTAKE_LIMIT {
            return Ok(());
        }
        let response = self
            .ask(
                AskKind::MistakeLimitReached,
                "Scribe is having trouble making progress. Provide guidance to help it continue, or cancel the task.".to_string(),
                false,
            )
            .await?;
        if let AskResponse::Message { text, images } = response {
            self.say(
                SayKind::UserFeedback,
                Some(text.clone()),
                Some(images.clone()),
                false,
            )
            .await?;
            user_content.push(ContentPart::text(format!(
                "The user has provided guidance after repeated failed attempts:\n<feedback>\n{text}\n</feedback>"
            )));
        }
        self.state().consecutive_mistakes = 0;
        Ok(())
    }

    /// A long run of auto-approved actions forces a human checkpoint to
    /// prevent runaway autonomous execution.
    async fn auto_approval_checkpoint(&self) -> Result<(), TaskError> {
        if !self.approval.limit_reached() {
            return Ok(());
        }
        self.ask(
            AskKind::AutoApprovalMaxReached,
            "The maximum number of consecutive auto-approved actions has been reached. Review progress before the task continues.".to_string(),
            false,
        )
        .await?;
        self.approval.reset();
        Ok(())
    }

    /// Stream one model turn, presenting blocks as they arrive.
    ///
    /// A failure on the very first event is a stream-establishment error:
    /// retryable behind a human gate, up to a bounded attempt count. A
    /// failure after content has flowed is a hard turn failure because tool
    /// side effects may already be committed.
    async fn stream_turn(&self) -> Result<ApiUsage, TaskError> {
        {
            let mut st = self.state();
            st.reset_turn();
            st.status = TaskStatus::AwaitingModel;
        }

        let system_prompt = self.build_system_prompt();
        let history: Vec<ConversationMessage> = self
            .state()
            .api_history
            .iter()
            .map(|m| m.message.clone())
            .collect();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.check_abort()?;

            let (tx, mut rx) = mpsc::channel(STREAM_EVENT_CHANNEL_CAPACITY);
            let provider = Arc::clone(&self.provider);
            let prompt = system_prompt.clone();
            let messages = history.clone();
            tokio::spawn(async move {
                if let Err(e) = provider.create_message(&prompt, &messages, tx.clone()).await {
                    let _ = tx.send(ProviderEvent::Error(e.to_string())).await;
                }
            });

            let first = self.recv_or_abort(&mut rx).await?;
            let establishment_error = match &first {
                Some(ProviderEvent::Error(e)) => Some(e.clone()),
                None => Some("stream ended before any content".to_string()),
                Some(_) => None,
            };

            let Some(error) = establishment_error else {
                let first = first.expect("non-error first event present");
                return self.consume_stream(rx, first).await;
            };

            tracing::warn!(attempt, "stream establishment failed: {error}");
            if attempt >= MAX_STREAM_ATTEMPTS {
                return Err(TaskError::StreamFailed(error));
            }
            let response = self.ask(AskKind::ApiReqFailed, error.clone(), false).await?;
            if !response.is_yes() {
                return Err(TaskError::StreamFailed(error));
            }
            self.say(SayKind::ApiReqRetried, None, None, false).await?;
        }
    }

    async fn consume_stream(
        &self,
        mut rx: mpsc::Receiver<ProviderEvent>,
        first: ProviderEvent,
    ) -> Result<ApiUsage, TaskError> {
        let mut usage = ApiUsage::default();
        let mut event = Some(first);

        loop {
            let Some(current) = event else { break };
            match current {
                ProviderEvent::Text(delta) => self.apply_text_delta(&delta).await?,
                ProviderEvent::Usage(u) => usage.accumulate(&u),
                ProviderEvent::Done => break,
                ProviderEvent::Error(e) => {
                    // Mid-stream failure: not retryable inline, tool side
                    // effects may have partially executed.
                    return Err(TaskError::MidStream(e));
                }
            }
            event = self.recv_or_abort(&mut rx).await?;
        }

        // Stream fully read: finalize any still-partial blocks and present
        // whatever has not been presented yet.
        {
            let mut st = self.state();
            st.did_complete_reading_stream = true;
            for block in &mut st.blocks {
                match block {
                    AssistantBlock::Text(b) => b.partial = false,
                    AssistantBlock::ToolUse(b) => b.partial = false,
                }
            }
        }
        self.present_assistant_message().await?;
        self.state().user_message_content_ready = true;
        Ok(usage)
    }

    /// Fold a new text delta into the block list and present the result.
    ///
    /// Blocks are updated in place by index so streaming consumers keep a
    /// stable identity for each block.
    async fn apply_text_delta(&self, delta: &str) -> Result<(), TaskError> {
        {
            let mut st = self.state();
            st.assistant_text.push_str(delta);
            let parsed = parse_assistant_message(&st.assistant_text);
            for (i, block) in parsed.into_iter().enumerate() {
                if i < st.blocks.len() {
                    st.blocks[i] = block;
                } else {
                    st.blocks.push(block);
                }
            }
        }
        self.present_assistant_message().await
    }

    /// Present blocks in strict ascending index order.
    ///
    /// Serialized by a mutual-exclusion flag: if invoked while a previous
    /// presentation is in flight, the new work is queued and drained after
    /// the in-flight block completes, preserving order.
    async fn present_assistant_message(&self) -> Result<(), TaskError> {
        loop {
            {
                let mut st = self.state();
                if st.present_locked {
                    st.present_pending = true;
                    return Ok(());
                }
                st.present_locked = true;
                st.status = TaskStatus::PresentingBlocks;
            }

            let advanced = self.present_current_block().await;

            let run_again = {
                let mut st = self.state();
                st.present_locked = false;
                let pending = std::mem::take(&mut st.present_pending);
                pending || matches!(advanced, Ok(true))
            };
            advanced?;
            if !run_again {
                return Ok(());
            }
        }
    }

    /// Present the block at the streaming cursor.
    ///
    /// Returns `Ok(true)` when a completed block was presented and a later
    /// block is already available, so the caller should continue.
    async fn present_current_block(&self) -> Result<bool, TaskError> {
        let block = {
            let mut st = self.state();
            let current = st.blocks.get(st.current_block_index).cloned();
            match current {
                Some(block) => block,
                None => {
                    if st.did_complete_reading_stream {
                        st.user_message_content_ready = true;
                    }
                    return Ok(false);
                }
            }
        };

        match &block {
            AssistantBlock::Text(text) => {
                if !text.text.is_empty() {
                    self.say(SayKind::Text, Some(text.text.clone()), None, text.partial)
                        .await?;
                }
            }
            AssistantBlock::ToolUse(tool_use) => {
                self.handle_tool_use(tool_use).await?;
            }
        }

        if block.is_partial() {
            return Ok(false);
        }
        let mut st = self.state();
        st.current_block_index += 1;
        let more = st.current_block_index < st.blocks.len();
        if !more && st.did_complete_reading_stream {
            st.user_message_content_ready = true;
        }
        Ok(more)
    }

    async fn handle_tool_use(&self, block: &ToolUseBlock) -> Result<(), TaskError> {
        let description = tool_description(block);

        if block.partial {
            let skip = {
                let st = self.state();
                st.did_reject_tool || st.did_already_use_tool
            };
            if skip {
                return Ok(());
            }
            // Streaming preview only; partial dispatch never side-effects.
            return self.dispatch_tool(block, true).await.map(|_| ());
        }

        if self.state().did_reject_tool {
            self.push_tool_result_text(format!(
                "Skipping tool {description} due to the user rejecting a previous tool."
            ));
            return Ok(());
        }

        // One tool use per turn: later tool blocks are rejected with an
        // explanation instead of executed.
        if self.state().did_already_use_tool {
            self.push_tool_result_text(format!(
                "Tool {description} was not executed because a tool has already been used in this message. Only one tool may be used per message; assess the first tool's result before using another."
            ));
            return Ok(());
        }

        let response = self.dispatch_tool(block, false).await?;

        {
            let mut st = self.state();
            if block.name == ToolUseName::AttemptCompletion
                && response.text.is_empty()
                && !response.rejected
            {
                st.completed = true;
            }
            if response.rejected {
                st.did_reject_tool = true;
            }
            if response.invalid_params {
                st.consecutive_mistakes += 1;
            }

            st.user_message_content
                .push(ContentPart::text(format!("{description} Result:")));
            let body = if response.text.is_empty() {
                "(tool did not return anything)".to_string()
            } else {
                response.text.clone()
            };
            st.user_message_content.push(ContentPart::text(body));
            for image in &response.images {
                st.user_message_content
                    .push(ContentPart::image("image/png", strip_data_uri(image)));
            }
            st.did_already_use_tool = true;

            if matches!(
                block.name,
                ToolUseName::WriteToFile | ToolUseName::ReplaceInFile
            ) && !response.rejected
            {
                st.did_edit_file = true;
            }
        }

        // A fresh edit invalidates the cached workspace listing.
        if matches!(
            block.name,
            ToolUseName::WriteToFile | ToolUseName::ReplaceInFile
        ) {
            self.env.invalidate();
        }
        Ok(())
    }

    async fn dispatch_tool(
        &self,
        block: &ToolUseBlock,
        partial: bool,
    ) -> Result<scribe_tools::ToolResponse, TaskError> {
        // A live &self guarantees the strong count is non-zero.
        let me = self.me.upgrade().expect("task alive while dispatching");
        let ctx = ToolContext {
            cwd: self.cwd.clone(),
            ui: me as Arc<dyn UserInteraction>,
            approval: Arc::clone(&self.approval),
        };
        self.registry
            .dispatch(&ctx, block.name, &block.params, partial)
            .await
            .map_err(|e| match e {
                ToolError::Aborted => TaskError::Aborted,
                other => TaskError::FrontEnd(other.to_string()),
            })
    }

    fn push_tool_result_text(&self, text: String) {
        let mut st = self.state();
        st.user_message_content.push(ContentPart::text(text));
    }

    /// Record an ask in the UI stream and block on the human's answer.
    ///
    /// Partial asks never block: they update the forming prompt in place
    /// and return immediately. Once the abort flag is set, in-flight asks
    /// fail instead of waiting.
    pub async fn ask(
        &self,
        kind: AskKind,
        text: String,
        partial: bool,
    ) -> Result<AskResponse, TaskError> {
        self.check_abort()?;
        {
            let mut st = self.state();
            let updated_in_place = match st.ui_messages.last_mut() {
                Some(last) if last.is_ask(kind) && last.partial == Some(true) => {
                    last.text = Some(text.clone());
                    if !partial {
                        last.partial = None;
                    }
                    true
                }
                _ => false,
            };
            if !updated_in_place {
                st.ui_messages
                    .push(UiMessage::ask(now_ms(), kind, Some(text.clone()), partial));
            }
            if !partial {
                st.status = status_for_ask(kind);
            }
        }

        if partial {
            let _ = self.front_end.ask(kind, &text, true).await;
            return Ok(AskResponse::Yes);
        }

        self.persist_ui()?;

        let mut abort_rx = self.abort_rx.clone();
        tokio::select! {
            () = wait_for_abort(&mut abort_rx) => Err(TaskError::Aborted),
            response = self.front_end.ask(kind, &text, false) => {
                response.map_err(|e| TaskError::FrontEnd(e.to_string()))
            }
        }
    }

    /// Record a say in the UI stream and notify the front end.
    ///
    /// Partial says mutate the trailing partial entry in place (identity is
    /// preserved for streaming consumers) and skip persistence; the final
    /// say for a block persists once.
    pub async fn say(
        &self,
        kind: SayKind,
        text: Option<String>,
        images: Option<Vec<String>>,
        partial: bool,
    ) -> Result<(), TaskError> {
        self.check_abort()?;
        {
            let mut st = self.state();
            let updated_in_place = match st.ui_messages.last_mut() {
                Some(last) if last.is_say(kind) && last.partial == Some(true) => {
                    last.text = text.clone();
                    last.images = images.clone();
                    if !partial {
                        last.partial = None;
                    }
                    true
                }
                _ => false,
            };
            if !updated_in_place {
                let mut message = UiMessage::say(now_ms(), kind, text.clone(), images);
                message.partial = partial.then_some(true);
                st.ui_messages.push(message);
            }
        }
        if !partial {
            self.persist_ui()?;
        }
        self.front_end.say(kind, text.as_deref(), partial).await;
        Ok(())
    }

    fn maybe_truncate_history(&self) -> Result<(), TaskError> {
        let window = self.provider.model().info.context_window;
        let mut st = self.state();
        let Some(usage) = st.last_request_usage else {
            return Ok(());
        };
        if !should_truncate(usage.total_tokens(), window) {
            return Ok(());
        }
        // Wholesale replacement: truncation never edits the list in place.
        st.api_history = truncate_half_conversation(&st.api_history);
        let snapshot = st.api_history.clone();
        drop(st);
        self.store
            .save_api_history(self.id, &snapshot)
            .map_err(TaskError::Persist)
    }

    /// Fill in the pending `api_req_started` entry with final metrics.
    fn record_request_metrics(&self, usage: ApiUsage) -> Result<(), TaskError> {
        let model = self.provider.model();
        let cost = usage
            .total_cost
            .unwrap_or_else(|| calculate_api_cost(&model.info, &usage));
        {
            let mut st = self.state();
            st.last_request_usage = Some(usage);
            if let Some(pos) = st
                .ui_messages
                .iter()
                .rposition(|m| m.is_say(SayKind::ApiReqStarted))
            {
                let mut metrics = st.ui_messages[pos]
                    .text
                    .as_deref()
                    .and_then(|t| serde_json::from_str::<serde_json::Value>(t).ok())
                    .unwrap_or_else(|| serde_json::json!({}));
                metrics["tokensIn"] = usage.input_tokens.into();
                metrics["tokensOut"] = usage.output_tokens.into();
                if let Some(reads) = usage.cache_read_tokens {
                    metrics["cacheReads"] = reads.into();
                }
                if let Some(writes) = usage.cache_write_tokens {
                    metrics["cacheWrites"] = writes.into();
                }
                metrics["cost"] = cost.into();
                st.ui_messages[pos].text = Some(metrics.to_string());
            }
        }
        self.persist_ui()
    }

    /// Cache the turn's token counts on the exchange just committed, so a
    /// resumed task can reason about context pressure without
    /// re-tokenizing.
    fn backfill_token_counts(&self, usage: ApiUsage) -> Result<(), TaskError> {
        let snapshot = {
            let mut st = self.state();
            let len = st.api_history.len();
            if len >= 2 {
                st.api_history[len - 2].token_count = Some(usage.input_tokens);
                st.api_history[len - 1].token_count = Some(usage.output_tokens);
            }
            st.api_history.clone()
        };
        self.store
            .save_api_history(self.id, &snapshot)
            .map_err(TaskError::Persist)
    }

    fn push_api_message(&self, message: ConversationMessage) -> Result<(), TaskError> {
        let snapshot = {
            let mut st = self.state();
            st.api_history.push(MessageWithTokenCount::new(message));
            st.api_history.clone()
        };
        self.store
            .save_api_history(self.id, &snapshot)
            .map_err(TaskError::Persist)
    }

    fn persist_ui(&self) -> Result<(), TaskError> {
        let snapshot = self.state().ui_messages.clone();
        self.store
            .save_ui_messages(self.id, &snapshot)
            .map_err(TaskError::Persist)
    }

    fn build_system_prompt(&self) -> String {
        let rules = prompt::load_rules_file(&self.cwd);
        prompt::append_user_instructions(
            self.base_prompt.clone(),
            self.custom_instructions.as_deref(),
            rules.as_deref(),
        )
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().expect("task state lock poisoned")
    }

    fn check_abort(&self) -> Result<(), TaskError> {
        if *self.abort_rx.borrow() {
            Err(TaskError::Aborted)
        } else {
            Ok(())
        }
    }

    async fn recv_or_abort(
        &self,
        rx: &mut mpsc::Receiver<ProviderEvent>,
    ) -> Result<Option<ProviderEvent>, TaskError> {
        let mut abort_rx = self.abort_rx.clone();
        tokio::select! {
            () = wait_for_abort(&mut abort_rx) => Err(TaskError::Aborted),
            event = rx.recv() => Ok(event),
        }
    }
}

impl UserInteraction for Task {
    fn ask<'a>(
        &'a self,
        kind: AskKind,
        text: String,
        partial: bool,
    ) -> BoxFuture<'a, Result<AskResponse, ToolError>> {
        Box::pin(async move {
            Task::ask(self, kind, text, partial)
                .await
                .map_err(to_tool_error)
        })
    }

    fn say<'a>(
        &'a self,
        kind: SayKind,
        text: Option<String>,
        images: Option<Vec<String>>,
        partial: bool,
    ) -> BoxFuture<'a, Result<(), ToolError>> {
        Box::pin(async move {
            Task::say(self, kind, text, images, partial)
                .await
                .map_err(to_tool_error)
        })
    }
}

fn to_tool_error(e: TaskError) -> ToolError {
    match e {
        TaskError::Aborted => ToolError::Aborted,
        other => ToolError::Interaction(other.to_string()),
    }
}

/// Resolves when the abort flag flips to true; pends forever otherwise.
async fn wait_for_abort(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without aborting; nothing left to wait for.
            std::future::pending::<()>().await;
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn status_for_ask(kind: AskKind) -> TaskStatus {
    match kind {
        AskKind::Command | AskKind::Tool | AskKind::BrowserActionLaunch => {
            TaskStatus::AwaitingToolApproval
        }
        AskKind::Followup
        | AskKind::ApiReqFailed
        | AskKind::MistakeLimitReached
        | AskKind::AutoApprovalMaxReached
        | AskKind::CompletionResult
        | AskKind::ResumeTask => TaskStatus::AwaitingUserInput,
    }
}

fn tool_description(block: &ToolUseBlock) -> String {
    let detail = block
        .params
        .get(&ToolParamName::Path)
        .or_else(|| block.params.get(&ToolParamName::Command))
        .or_else(|| block.params.get(&ToolParamName::Action))
        .or_else(|| block.params.get(&ToolParamName::Question));
    match detail {
        Some(detail) => format!(
            "[{} for '{}']",
            block.name,
            truncate_with_ellipsis(detail, 60)
        ),
        None => format!("[{}]", block.name),
    }
}

fn summarize_part(part: &ContentPart) -> String {
    match part {
        ContentPart::Text { text } => truncate_with_ellipsis(text, 300),
        ContentPart::Image { .. } => "[image]".to_string(),
        ContentPart::ToolUse { name, .. } => format!("[tool use: {name}]"),
        ContentPart::ToolResult { .. } => "[tool result]".to_string(),
    }
}

/// Persisted image data is bare base64; accept data URIs from tools.
fn strip_data_uri(data: &str) -> String {
    match data.split_once(";base64,") {
        Some((_, b64)) => b64.to_string(),
        None => data.to_string(),
    }
}

#[cfg(test)]
mod unit_tests {
    use scribe_types::{ToolParamName, ToolUseBlock, ToolUseName};

    use super::{strip_data_uri, tool_description};

    #[test]
    fn tool_description_prefers_path() {
        let block = ToolUseBlock {
            name: ToolUseName::ReadFile,
            params: [(ToolParamName::Path, "src/lib.rs".to_string())]
                .into_iter()
                .collect(),
            partial: false,
        };
        assert_eq!(tool_description(&block), "[read_file for 'src/lib.rs']");
    }

    #[test]
    fn tool_description_without_params() {
        let block = ToolUseBlock {
            name: ToolUseName::AttemptCompletion,
            params: Default::default(),
            partial: false,
        };
        assert_eq!(tool_description(&block), "[attempt_completion]");
    }

    #[test]
    fn data_uri_prefix_is_stripped() {
        assert_eq!(strip_data_uri("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri("QUJD"), "QUJD");
    }
}
