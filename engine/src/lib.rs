//! Task orchestration for Scribe.
//!
//! # Architecture
//!
//! The engine owns the task state machine: it streams model turns through
//! a [`scribe_providers::ModelProvider`], parses the output incrementally
//! ([`assistant_message`]), presents blocks in order, dispatches tool
//! invocations through [`scribe_tools`], truncates history near the
//! context limit ([`sliding_window`]), and persists both message streams
//! after every append ([`persistence`]).
//!
//! The human sits behind the [`FrontEnd`] seam; any interactive surface
//! (CLI, editor plugin) implements it.

pub mod assistant_message;
pub mod environment;
pub mod persistence;
pub mod prompt;
pub mod sliding_window;
pub mod task;

#[cfg(test)]
mod tests;

use futures_util::future::BoxFuture;

use scribe_types::{AskKind, AskResponse, SayKind};

pub use environment::EnvironmentInspector;
pub use persistence::{API_HISTORY_FILE, TaskStore, UI_MESSAGES_FILE};
pub use task::{Task, TaskAbortHandle, TaskDeps, TaskStatus};

/// Task-level failures.
///
/// Tool-local errors never surface here — they become conversation
/// content. What does surface is what the task cannot absorb: stream
/// failures, persistence failures, and abort.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task aborted")]
    Aborted,
    /// Stream establishment failed and the human declined (or exhausted)
    /// retries.
    #[error("stream request failed: {0}")]
    StreamFailed(String),
    /// The stream failed after content had flowed; tool side effects may
    /// already be committed, so this is not retried inline.
    #[error("stream failed mid-turn: {0}")]
    MidStream(String),
    #[error("persistence failed: {0}")]
    Persist(#[from] std::io::Error),
    #[error("front end failed: {0}")]
    FrontEnd(String),
}

/// The interactive surface a task talks to.
///
/// `ask` blocks until the human answers (a `partial == true` ask is a
/// non-blocking preview of the forming question and must return
/// immediately). `say` is fire-and-forget display.
pub trait FrontEnd: Send + Sync {
    fn ask<'a>(
        &'a self,
        kind: AskKind,
        text: &'a str,
        partial: bool,
    ) -> BoxFuture<'a, anyhow::Result<AskResponse>>;

    fn say<'a>(&'a self, kind: SayKind, text: Option<&'a str>, partial: bool)
    -> BoxFuture<'a, ()>;
}
