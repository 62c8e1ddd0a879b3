//! Scribe CLI - binary entry point.
//!
//! Wires the engine to a stdin/stdout front end: builds the provider from
//! config + environment keys, registers the built-in tools, and runs (or
//! resumes) a task. Ctrl-C aborts the running task, force-releasing
//! terminal and browser resources.

mod config;
mod front_end;

use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, fmt};

use scribe_engine::{FrontEnd, Task, TaskDeps, TaskError, TaskStore};
use scribe_providers::{ModelProvider, anthropic::AnthropicProvider, openai::OpenAiProvider};
use scribe_terminal::{TerminalManager, detect_shell};
use scribe_tools::{
    ApprovalGate, BrowserSession, ToolRegistry, browser::BrowserActionTool,
    command::ExecuteCommandTool, explore::ListFilesTool, explore::SearchFilesTool,
    file::ReadFileTool, file::ReplaceInFileTool, file::WriteToFileTool,
    interact::AskFollowupQuestionTool, interact::AttemptCompletionTool,
};
use scribe_types::TaskId;

use config::{ProviderKind, ScribeConfig};
use front_end::StdioFrontEnd;

fn init_tracing(data_dir: &std::path::Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // Logs go to a file; stdout belongs to the interactive session.
    let log_path = data_dir.join("scribe.log");
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(std::sync::Mutex::new(file)))
                .with(env_filter)
                .init();
            tracing::info!(path = %log_path.display(), "logging initialized");
        }
        Err(_) => {
            // Prefer no logs over corrupting the interactive terminal.
            tracing_subscriber::registry().with(env_filter).init();
        }
    }
}

enum Invocation {
    NewTask(String),
    Resume(Option<TaskId>),
    ListTasks,
}

fn parse_args(args: &[String]) -> Result<Invocation> {
    match args.first().map(String::as_str) {
        Some("--resume") => {
            let id = args.get(1).map(|raw| raw.parse()).transpose()?;
            Ok(Invocation::Resume(id))
        }
        Some("--list") => Ok(Invocation::ListTasks),
        Some(_) => Ok(Invocation::NewTask(args.join(" "))),
        None => bail!("usage: scribe <task text> | scribe --resume [task-id] | scribe --list"),
    }
}

fn build_provider(config: &ScribeConfig) -> Result<Arc<dyn ModelProvider>> {
    let key = config.api_key()?;
    let model = config.model();
    Ok(match config.provider {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(key, model)?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(key, model)?),
    })
}

fn build_registry(terminals: &Arc<TerminalManager>) -> Result<ToolRegistry> {
    let browser = Arc::new(BrowserSession::default());
    let mut registry = ToolRegistry::default();
    registry.register(Box::new(ReadFileTool))?;
    registry.register(Box::new(WriteToFileTool))?;
    registry.register(Box::new(ReplaceInFileTool))?;
    registry.register(Box::new(ListFilesTool))?;
    registry.register(Box::new(SearchFilesTool))?;
    registry.register(Box::new(ExecuteCommandTool::new(Arc::clone(terminals))))?;
    registry.register(Box::new(BrowserActionTool::new(browser)))?;
    registry.register(Box::new(AskFollowupQuestionTool))?;
    registry.register(Box::new(AttemptCompletionTool::new(Arc::clone(terminals))))?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let data_dir = config::data_dir();
    init_tracing(&data_dir);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = parse_args(&args)?;

    let config = ScribeConfig::load(&data_dir)?;
    let store = TaskStore::new(data_dir.join("tasks"));

    if let Invocation::ListTasks = invocation {
        for id in store.list_tasks()? {
            let messages = store.load_ui_messages(id)?;
            let summary = messages
                .first()
                .and_then(|m| m.text.clone())
                .unwrap_or_else(|| "(empty)".to_string());
            println!("{id}  {}", scribe_types::truncate_with_ellipsis(&summary, 80));
        }
        return Ok(());
    }

    let provider = build_provider(&config)?;
    let shell = detect_shell(config.shell.as_deref());
    let shell_name = shell.name.clone();
    let terminals = Arc::new(TerminalManager::new(shell));
    let registry = Arc::new(build_registry(&terminals)?);
    let approval = Arc::new(ApprovalGate::new(config.auto_approval.clone()));
    let cwd = std::env::current_dir().context("cannot determine working directory")?;

    let deps = TaskDeps {
        provider,
        registry,
        approval,
        terminals,
        front_end: Arc::new(StdioFrontEnd) as Arc<dyn FrontEnd>,
        store: store.clone(),
        cwd,
        shell_name,
        custom_instructions: config.custom_instructions.clone(),
    };

    let (task, result) = match invocation {
        Invocation::NewTask(text) => {
            let task = Task::new(deps);
            abort_on_ctrl_c(&task);
            let result = task.run(&text, Vec::new()).await;
            (task, result)
        }
        Invocation::Resume(id) => {
            let id = match id {
                Some(id) => id,
                None => store
                    .list_tasks()?
                    .pop()
                    .context("no persisted tasks to resume")?,
            };
            let task = Task::rehydrate(deps, id)?;
            abort_on_ctrl_c(&task);
            let result = task.resume().await;
            (task, result)
        }
        Invocation::ListTasks => unreachable!("handled above"),
    };

    match result {
        Ok(()) => {
            println!("\ntask complete (id {})", task.id());
            Ok(())
        }
        Err(TaskError::Aborted) => {
            println!(
                "\ntask aborted; resume with: scribe --resume {}",
                task.id()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("\ntask failed: {e}");
            Err(e.into())
        }
    }
}

/// Ctrl-C aborts the task and force-releases tool resources.
fn abort_on_ctrl_c(task: &Arc<Task>) {
    let abort = task.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\naborting...");
            abort.abort().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::{Invocation, parse_args};

    #[test]
    fn plain_args_join_into_task_text() {
        let args = vec!["fix".to_string(), "the bug".to_string()];
        let Invocation::NewTask(text) = parse_args(&args).unwrap() else {
            panic!("expected new task");
        };
        assert_eq!(text, "fix the bug");
    }

    #[test]
    fn resume_parses_optional_id() {
        let args = vec!["--resume".to_string(), "1700000000000".to_string()];
        let Invocation::Resume(Some(id)) = parse_args(&args).unwrap() else {
            panic!("expected resume with id");
        };
        assert_eq!(id.as_millis(), 1_700_000_000_000);

        let Invocation::Resume(None) = parse_args(&["--resume".to_string()]).unwrap() else {
            panic!("expected resume without id");
        };
    }

    #[test]
    fn no_args_is_usage_error() {
        assert!(parse_args(&[]).is_err());
    }
}
