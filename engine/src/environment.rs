//! Per-turn environment snapshots.
//!
//! Appended to each user message as an `<environment_details>` block:
//! workspace file listing (cached with a TTL), terminal state, and the
//! current time. An explicitly constructed, injected service — callers
//! invalidate the cache on configuration changes rather than relying on
//! ambient global state.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ignore::WalkBuilder;

use scribe_terminal::TerminalManager;

const FILE_LISTING_TTL: Duration = Duration::from_secs(30 * 60);
const MAX_LISTED_FILES: usize = 200;
/// How long to wait for a hot terminal to settle before reporting state.
const HOT_TERMINAL_WAIT: Duration = Duration::from_secs(5);
const HOT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct EnvironmentInspector {
    cwd: PathBuf,
    terminals: Arc<TerminalManager>,
    file_listing: Mutex<Option<(Instant, String)>>,
}

impl EnvironmentInspector {
    #[must_use]
    pub fn new(cwd: PathBuf, terminals: Arc<TerminalManager>) -> Self {
        Self {
            cwd,
            terminals,
            file_listing: Mutex::new(None),
        }
    }

    /// Drop the cached file listing; the next snapshot walks fresh.
    pub fn invalidate(&self) {
        let mut cache = self.file_listing.lock().expect("cache lock poisoned");
        *cache = None;
    }

    /// Render the environment block for the next user message.
    pub async fn snapshot(&self, include_file_details: bool) -> String {
        let mut out = String::from("<environment_details>\n");

        // A hot terminal is still producing output (e.g. mid-compile);
        // give it a moment so we don't report half-finished state.
        let waited = Instant::now();
        while self.any_busy_terminal_hot() && waited.elapsed() < HOT_TERMINAL_WAIT {
            tokio::time::sleep(HOT_POLL_INTERVAL).await;
        }

        let busy = self.terminals.terminals(true);
        if !busy.is_empty() {
            out.push_str("# Actively Running Terminals\n");
            for info in busy {
                out.push_str(&format!("## Terminal {}: `{}`\n", info.id, info.last_command));
                let unretrieved = self.terminals.get_unretrieved_output(info.id);
                if !unretrieved.is_empty() {
                    out.push_str("### New Output\n");
                    out.push_str(&unretrieved);
                    out.push('\n');
                }
            }
        }

        if include_file_details {
            out.push_str(&format!(
                "# Current Working Directory ({}) Files\n",
                self.cwd.display()
            ));
            out.push_str(&self.cached_file_listing());
            out.push('\n');
        }

        out.push_str(&format!(
            "# Current Time\n{}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S %Z")
        ));
        out.push_str("</environment_details>");
        out
    }

    fn any_busy_terminal_hot(&self) -> bool {
        self.terminals
            .terminals(true)
            .iter()
            .any(|info| self.terminals.is_hot(info.id))
    }

    fn cached_file_listing(&self) -> String {
        {
            let cache = self.file_listing.lock().expect("cache lock poisoned");
            if let Some((at, listing)) = cache.as_ref()
                && at.elapsed() < FILE_LISTING_TTL
            {
                return listing.clone();
            }
        }

        let listing = self.walk_files();
        let mut cache = self.file_listing.lock().expect("cache lock poisoned");
        *cache = Some((Instant::now(), listing.clone()));
        listing
    }

    fn walk_files(&self) -> String {
        let mut files = Vec::new();
        let mut truncated = false;
        for entry in WalkBuilder::new(&self.cwd).build().flatten() {
            if entry.depth() == 0 || !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if files.len() >= MAX_LISTED_FILES {
                truncated = true;
                break;
            }
            files.push(
                entry
                    .path()
                    .strip_prefix(&self.cwd)
                    .unwrap_or(entry.path())
                    .display()
                    .to_string(),
            );
        }
        files.sort();
        if truncated {
            files.push("(file list truncated)".to_string());
        }
        if files.is_empty() {
            "(no files)".to_string()
        } else {
            files.join("\n")
        }
    }
}
