//! End-to-end engine tests with a scripted provider and front end.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use scribe_providers::ModelProvider;
use scribe_terminal::{TerminalManager, detect_shell};
use scribe_tools::{
    ApprovalGate, BrowserSession, ToolRegistry, browser::BrowserActionTool,
    command::ExecuteCommandTool, explore::ListFilesTool, explore::SearchFilesTool,
    file::ReadFileTool, file::ReplaceInFileTool, file::WriteToFileTool,
    interact::AskFollowupQuestionTool, interact::AttemptCompletionTool,
};
use scribe_types::{
    ApiUsage, AskKind, AskResponse, AutoApprovalSettings, ContentPart, ConversationMessage,
    Model, ModelInfo, ProviderEvent, SayKind,
};

use crate::persistence::TaskStore;
use crate::task::{Task, TaskDeps, TaskStatus};
use crate::{FrontEnd, TaskError};

struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<ProviderEvent>>>,
    model: Model,
}

impl ScriptedProvider {
    fn new(turns: Vec<Vec<ProviderEvent>>, context_window: u32) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            model: Model {
                id: "scripted-model".to_string(),
                info: ModelInfo {
                    context_window,
                    ..Default::default()
                },
            },
        }
    }
}

impl ModelProvider for ScriptedProvider {
    fn model(&self) -> Model {
        self.model.clone()
    }

    fn create_message<'a>(
        &'a self,
        _system_prompt: &'a str,
        _messages: &'a [ConversationMessage],
        tx: mpsc::Sender<ProviderEvent>,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let events = self
                .turns
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| vec![ProviderEvent::Error("script exhausted".to_string())]);
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Ok(())
        })
    }
}

#[derive(Default)]
struct TestFrontEnd {
    responses: Mutex<VecDeque<AskResponse>>,
    asks: Mutex<Vec<(AskKind, String, bool)>>,
    says: Mutex<Vec<(SayKind, Option<String>, bool)>>,
    hang_on: Option<AskKind>,
}

impl TestFrontEnd {
    fn answering(responses: Vec<AskResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    fn asked(&self, kind: AskKind) -> bool {
        self.asks
            .lock()
            .unwrap()
            .iter()
            .any(|(k, _, partial)| *k == kind && !partial)
    }

    fn said(&self, kind: SayKind) -> bool {
        self.says.lock().unwrap().iter().any(|(k, _, _)| *k == kind)
    }
}

impl FrontEnd for TestFrontEnd {
    fn ask<'a>(
        &'a self,
        kind: AskKind,
        text: &'a str,
        partial: bool,
    ) -> BoxFuture<'a, anyhow::Result<AskResponse>> {
        Box::pin(async move {
            self.asks
                .lock()
                .unwrap()
                .push((kind, text.to_string(), partial));
            if partial {
                return Ok(AskResponse::Yes);
            }
            if self.hang_on == Some(kind) {
                std::future::pending::<()>().await;
            }
            let response = self.responses.lock().unwrap().pop_front();
            Ok(response.unwrap_or(AskResponse::Yes))
        })
    }

    fn say<'a>(
        &'a self,
        kind: SayKind,
        text: Option<&'a str>,
        partial: bool,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.says
                .lock()
                .unwrap()
                .push((kind, text.map(ToString::to_string), partial));
        })
    }
}

struct Harness {
    task: Arc<Task>,
    front_end: Arc<TestFrontEnd>,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

fn build_registry(terminals: &Arc<TerminalManager>) -> ToolRegistry {
    let browser = Arc::new(BrowserSession::default());
    let mut registry = ToolRegistry::default();
    registry.register(Box::new(ReadFileTool)).unwrap();
    registry.register(Box::new(WriteToFileTool)).unwrap();
    registry.register(Box::new(ReplaceInFileTool)).unwrap();
    registry.register(Box::new(ListFilesTool)).unwrap();
    registry.register(Box::new(SearchFilesTool)).unwrap();
    registry
        .register(Box::new(ExecuteCommandTool::new(Arc::clone(terminals))))
        .unwrap();
    registry
        .register(Box::new(BrowserActionTool::new(browser)))
        .unwrap();
    registry.register(Box::new(AskFollowupQuestionTool)).unwrap();
    registry
        .register(Box::new(AttemptCompletionTool::new(Arc::clone(terminals))))
        .unwrap();
    registry
}

fn harness(
    turns: Vec<Vec<ProviderEvent>>,
    front_end: TestFrontEnd,
    approval: AutoApprovalSettings,
    context_window: u32,
) -> Harness {
    let workspace = tempfile::tempdir().unwrap();
    let storage = tempfile::tempdir().unwrap();

    let terminals = Arc::new(TerminalManager::new(detect_shell(None)));
    let registry = build_registry(&terminals);

    let front_end = Arc::new(front_end);
    let task = Task::new(TaskDeps {
        provider: Arc::new(ScriptedProvider::new(turns, context_window)),
        registry: Arc::new(registry),
        approval: Arc::new(ApprovalGate::new(approval)),
        terminals,
        front_end: Arc::clone(&front_end) as Arc<dyn FrontEnd>,
        store: TaskStore::new(storage.path()),
        cwd: workspace.path().to_path_buf(),
        shell_name: "sh".to_string(),
        custom_instructions: None,
    });

    Harness {
        task,
        front_end,
        _dirs: (workspace, storage),
    }
}

fn auto_edit_approval() -> AutoApprovalSettings {
    AutoApprovalSettings {
        enabled: true,
        read_files: true,
        edit_files: true,
        max_requests: 100,
        ..Default::default()
    }
}

fn completion_turn() -> Vec<ProviderEvent> {
    vec![
        ProviderEvent::Text(
            "<attempt_completion>\n<result>\nDone.\n</result>\n</attempt_completion>".to_string(),
        ),
        ProviderEvent::Done,
    ]
}

fn history_texts(task: &Task) -> Vec<String> {
    task.api_history()
        .iter()
        .map(|m| m.message.text())
        .collect()
}

#[tokio::test]
async fn completes_via_attempt_completion() {
    let h = harness(
        vec![completion_turn()],
        TestFrontEnd::default(),
        auto_edit_approval(),
        128_000,
    );
    h.task.run("say done", Vec::new()).await.unwrap();
    assert_eq!(h.task.status(), TaskStatus::Completed);
    assert!(h.front_end.asked(AskKind::CompletionResult));
    assert!(h.front_end.said(SayKind::CompletionResult));
}

#[tokio::test]
async fn one_tool_per_turn_rejects_the_second() {
    let two_tools = vec![
        ProviderEvent::Text(
            "<write_to_file><path>a.txt</path><content>one</content></write_to_file><write_to_file><path>b.txt</path><content>two</content></write_to_file>"
                .to_string(),
        ),
        ProviderEvent::Usage(ApiUsage {
            input_tokens: 100,
            output_tokens: 50,
            ..Default::default()
        }),
        ProviderEvent::Done,
    ];
    let h = harness(
        vec![two_tools, completion_turn()],
        TestFrontEnd::default(),
        auto_edit_approval(),
        128_000,
    );

    h.task.run("create two files", Vec::new()).await.unwrap();

    let cwd = h._dirs.0.path();
    assert_eq!(std::fs::read_to_string(cwd.join("a.txt")).unwrap(), "one");
    assert!(!cwd.join("b.txt").exists());

    // The rejection is recorded in conversation history for the model.
    let texts = history_texts(&h.task);
    let rejection = texts
        .iter()
        .find(|t| t.contains("already been used"))
        .expect("rejection message present in history");
    assert!(rejection.contains("write_to_file"));
}

#[tokio::test]
async fn partial_tool_deltas_never_side_effect() {
    // The tool tag arrives split across several deltas; only the final
    // non-partial invocation may write.
    let split_turn = vec![
        ProviderEvent::Text("<write_to_file><pa".to_string()),
        ProviderEvent::Text("th>a.txt</path><content>on".to_string()),
        ProviderEvent::Text("e</content></write_to_file>".to_string()),
        ProviderEvent::Done,
    ];
    let h = harness(
        vec![split_turn, completion_turn()],
        TestFrontEnd::default(),
        auto_edit_approval(),
        128_000,
    );
    h.task.run("create a file", Vec::new()).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(h._dirs.0.path().join("a.txt")).unwrap(),
        "one"
    );
}

#[tokio::test]
async fn first_chunk_failure_retries_behind_human_gate() {
    let h = harness(
        vec![
            vec![ProviderEvent::Error("connection reset".to_string())],
            completion_turn(),
        ],
        TestFrontEnd::default(),
        auto_edit_approval(),
        128_000,
    );
    h.task.run("task", Vec::new()).await.unwrap();
    assert!(h.front_end.asked(AskKind::ApiReqFailed));
    assert!(h.front_end.said(SayKind::ApiReqRetried));
    assert_eq!(h.task.status(), TaskStatus::Completed);
}

#[tokio::test]
async fn declined_retry_fails_the_task() {
    let h = harness(
        vec![vec![ProviderEvent::Error("connection reset".to_string())]],
        TestFrontEnd::answering(vec![AskResponse::No]),
        auto_edit_approval(),
        128_000,
    );
    let err = h.task.run("task", Vec::new()).await.unwrap_err();
    assert!(matches!(err, TaskError::StreamFailed(_)));
    assert_eq!(h.task.status(), TaskStatus::Aborted);
}

#[tokio::test]
async fn mid_stream_error_is_a_hard_failure() {
    let h = harness(
        vec![vec![
            ProviderEvent::Text("some partial".to_string()),
            ProviderEvent::Error("cut off".to_string()),
        ]],
        TestFrontEnd::default(),
        auto_edit_approval(),
        128_000,
    );
    let err = h.task.run("task", Vec::new()).await.unwrap_err();
    assert!(matches!(err, TaskError::MidStream(_)));
    // No retry prompt for mid-stream failures.
    assert!(!h.front_end.asked(AskKind::ApiReqFailed));
}

#[tokio::test]
async fn missing_tool_use_feeds_error_back_to_model() {
    let h = harness(
        vec![
            vec![
                ProviderEvent::Text("Working on it, stand by.".to_string()),
                ProviderEvent::Done,
            ],
            completion_turn(),
        ],
        TestFrontEnd::default(),
        auto_edit_approval(),
        128_000,
    );
    h.task.run("task", Vec::new()).await.unwrap();
    let texts = history_texts(&h.task);
    assert!(
        texts
            .iter()
            .any(|t| t.contains("You did not use a tool"))
    );
}

#[tokio::test]
async fn mistake_limit_forces_human_checkpoint() {
    let chatter = || {
        vec![
            ProviderEvent::Text("thinking out loud".to_string()),
            ProviderEvent::Done,
        ]
    };
    let h = harness(
        vec![chatter(), chatter(), chatter(), completion_turn()],
        TestFrontEnd::answering(vec![AskResponse::Message {
            text: "just call attempt_completion".to_string(),
            images: vec![],
        }]),
        auto_edit_approval(),
        128_000,
    );
    h.task.run("task", Vec::new()).await.unwrap();
    assert!(h.front_end.asked(AskKind::MistakeLimitReached));
    let texts = history_texts(&h.task);
    assert!(
        texts
            .iter()
            .any(|t| t.contains("just call attempt_completion"))
    );
}

#[tokio::test]
async fn context_truncation_drops_old_exchanges() {
    // 64k window with 27k margin: 50k total tokens crosses the threshold,
    // so history is truncated before each subsequent request.
    let heavy_usage = ApiUsage {
        input_tokens: 50_000,
        output_tokens: 500,
        ..Default::default()
    };
    let read_turn = |path: &str| {
        vec![
            ProviderEvent::Text(format!("<list_files><path>{path}</path></list_files>")),
            ProviderEvent::Usage(heavy_usage),
            ProviderEvent::Done,
        ]
    };
    let h = harness(
        vec![
            read_turn("."),
            read_turn("."),
            read_turn("."),
            completion_turn(),
        ],
        TestFrontEnd::default(),
        auto_edit_approval(),
        64_000,
    );
    h.task.run("original task", Vec::new()).await.unwrap();

    let texts = history_texts(&h.task);
    // Without truncation there would be 8 messages; the oldest exchanges
    // were dropped, but never the first (the original task).
    assert!(texts.len() < 8, "history was not truncated: {texts:?}");
    assert!(texts[0].contains("original task"));
}

#[tokio::test]
async fn persists_both_state_files_after_run() {
    let h = harness(
        vec![completion_turn()],
        TestFrontEnd::default(),
        auto_edit_approval(),
        128_000,
    );
    h.task.run("task", Vec::new()).await.unwrap();

    let store = TaskStore::new(h._dirs.1.path());
    let ui = store.load_ui_messages(h.task.id()).unwrap();
    let api = store.load_api_history(h.task.id()).unwrap();
    assert!(ui.iter().any(|m| m.is_say(SayKind::Task)));
    assert!(api.len() >= 2);
    // The committed exchange carries cached token counts for resume.
    assert!(api[api.len() - 2].token_count.is_some());
    assert!(api[api.len() - 1].token_count.is_some());
}

#[tokio::test]
async fn abort_fails_inflight_ask_immediately() {
    let front_end = TestFrontEnd {
        hang_on: Some(AskKind::CompletionResult),
        ..Default::default()
    };
    let h = harness(
        vec![completion_turn()],
        front_end,
        auto_edit_approval(),
        128_000,
    );

    let task = Arc::clone(&h.task);
    let runner = tokio::spawn(async move { task.run("task", Vec::new()).await });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    h.task.abort_handle().abort().await;

    let result = runner.await.unwrap();
    assert!(matches!(result, Err(TaskError::Aborted)));
    assert_eq!(h.task.status(), TaskStatus::Aborted);
}

#[tokio::test]
async fn api_request_metrics_are_recorded() {
    let turn = vec![
        ProviderEvent::Text(
            "<attempt_completion>\n<result>\nDone.\n</result>\n</attempt_completion>".to_string(),
        ),
        ProviderEvent::Usage(ApiUsage {
            input_tokens: 123,
            output_tokens: 45,
            cache_read_tokens: Some(10),
            cache_write_tokens: None,
            total_cost: None,
        }),
        ProviderEvent::Done,
    ];
    let h = harness(
        vec![turn],
        TestFrontEnd::default(),
        auto_edit_approval(),
        128_000,
    );
    h.task.run("task", Vec::new()).await.unwrap();

    let started = h
        .task
        .ui_messages()
        .into_iter()
        .find(|m| m.is_say(SayKind::ApiReqStarted))
        .expect("api_req_started present");
    let metrics: serde_json::Value = serde_json::from_str(started.text.as_deref().unwrap()).unwrap();
    assert_eq!(metrics["tokensIn"], 123);
    assert_eq!(metrics["tokensOut"], 45);
    assert_eq!(metrics["cacheReads"], 10);
    assert!(metrics.get("cacheWrites").is_none());
    assert!(metrics.get("cost").is_some());
}

#[tokio::test]
async fn resume_strips_incomplete_api_request_entry() {
    let h = harness(
        vec![completion_turn()],
        TestFrontEnd::default(),
        auto_edit_approval(),
        128_000,
    );

    // Seed persisted state resembling an interrupted task: a trailing
    // api_req_started without metrics and a stale resume ask.
    let store = TaskStore::new(h._dirs.1.path());
    let id = h.task.id();
    let seeded = vec![
        scribe_types::UiMessage::say(1, SayKind::Task, Some("old task".to_string()), None),
        scribe_types::UiMessage::say(
            2,
            SayKind::ApiReqStarted,
            Some(r#"{"request":"..."}"#.to_string()),
            None,
        ),
        scribe_types::UiMessage::ask(3, AskKind::ResumeTask, None, false),
    ];
    store.save_ui_messages(id, &seeded).unwrap();
    store
        .save_api_history(
            id,
            &[scribe_types::MessageWithTokenCount::new(
                ConversationMessage::user(vec![ContentPart::text("<task>old task</task>")]),
            )],
        )
        .unwrap();

    let terminals = Arc::new(TerminalManager::new(detect_shell(None)));
    let resumed = Task::rehydrate(
        TaskDeps {
            provider: Arc::new(ScriptedProvider::new(vec![completion_turn()], 128_000)),
            registry: Arc::new(build_registry(&terminals)),
            approval: Arc::new(ApprovalGate::new(auto_edit_approval())),
            terminals,
            front_end: Arc::clone(&h.front_end) as Arc<dyn FrontEnd>,
            store: store.clone(),
            cwd: h._dirs.0.path().to_path_buf(),
            shell_name: "sh".to_string(),
            custom_instructions: None,
        },
        id,
    )
    .unwrap();

    resumed.resume().await.unwrap();

    let ui = resumed.ui_messages();
    // The stale resume ask and the metric-less api_req_started were
    // stripped during rehydration cleanup.
    assert!(h.front_end.asked(AskKind::ResumeTask));
    assert!(!ui.iter().any(|m| {
        m.is_say(SayKind::ApiReqStarted) && m.text.as_deref() == Some(r#"{"request":"..."}"#)
    }));
    // The resumption context reached the model conversation.
    let texts: Vec<String> = resumed
        .api_history()
        .iter()
        .map(|m| m.message.text())
        .collect();
    assert!(texts.iter().any(|t| t.contains("[TASK RESUMPTION]")));
}
