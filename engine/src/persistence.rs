//! Durable per-task state.
//!
//! Each task directory (keyed by task id) holds two files, both rewritten
//! atomically after every append:
//!
//! - `ui_messages.json` — the presentation-facing ask/say stream;
//! - `api_conversation_history.json` — the model-API conversation with
//!   cached token counts.

use std::io;
use std::path::{Path, PathBuf};

use scribe_types::{MessageWithTokenCount, TaskId, UiMessage};
use scribe_utils::atomic_write;

pub const UI_MESSAGES_FILE: &str = "ui_messages.json";
pub const API_HISTORY_FILE: &str = "api_conversation_history.json";

/// Filesystem layout for persisted tasks.
#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    /// `root` is the directory that holds one subdirectory per task.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn task_dir(&self, id: TaskId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Ids of all persisted tasks, oldest first.
    pub fn list_tasks(&self) -> io::Result<Vec<TaskId>> {
        let mut ids = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str()
                && let Ok(id) = name.parse::<TaskId>()
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn save_ui_messages(&self, id: TaskId, messages: &[UiMessage]) -> io::Result<()> {
        let bytes = serde_json::to_vec(messages)?;
        atomic_write(&self.task_dir(id).join(UI_MESSAGES_FILE), &bytes)
    }

    pub fn load_ui_messages(&self, id: TaskId) -> io::Result<Vec<UiMessage>> {
        load_json(&self.task_dir(id).join(UI_MESSAGES_FILE))
    }

    pub fn save_api_history(
        &self,
        id: TaskId,
        history: &[MessageWithTokenCount],
    ) -> io::Result<()> {
        let bytes = serde_json::to_vec(history)?;
        atomic_write(&self.task_dir(id).join(API_HISTORY_FILE), &bytes)
    }

    pub fn load_api_history(&self, id: TaskId) -> io::Result<Vec<MessageWithTokenCount>> {
        load_json(&self.task_dir(id).join(API_HISTORY_FILE))
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Vec<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use scribe_types::{
        AskKind, ContentPart, ConversationMessage, MessageWithTokenCount, TaskId, UiMessage,
    };

    use super::TaskStore;

    #[test]
    fn roundtrips_ui_messages() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let id = TaskId::from_millis(42);
        let messages = vec![UiMessage::ask(1, AskKind::Command, Some("ls".into()), false)];
        store.save_ui_messages(id, &messages).unwrap();
        assert_eq!(store.load_ui_messages(id).unwrap(), messages);
    }

    #[test]
    fn roundtrips_api_history_with_token_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let id = TaskId::from_millis(43);
        let mut msg = MessageWithTokenCount::new(ConversationMessage::user(vec![
            ContentPart::text("hello"),
        ]));
        msg.token_count = Some(17);
        store.save_api_history(id, &[msg]).unwrap();
        let loaded = store.load_api_history(id).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].token_count, Some(17));
        assert_eq!(loaded[0].message.text(), "hello");
    }

    #[test]
    fn missing_files_load_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let id = TaskId::from_millis(44);
        assert!(store.load_ui_messages(id).unwrap().is_empty());
        assert!(store.load_api_history(id).unwrap().is_empty());
    }

    #[test]
    fn lists_tasks_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        store.save_ui_messages(TaskId::from_millis(200), &[]).unwrap();
        store.save_ui_messages(TaskId::from_millis(100), &[]).unwrap();
        let ids = store.list_tasks().unwrap();
        assert_eq!(
            ids,
            vec![TaskId::from_millis(100), TaskId::from_millis(200)]
        );
    }

    #[test]
    fn listing_missing_root_is_empty() {
        let store = TaskStore::new("/nonexistent/scribe-task-root");
        assert!(store.list_tasks().unwrap().is_empty());
    }
}
