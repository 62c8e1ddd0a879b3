//! Terminal session registry and command execution.
//!
//! Sessions are keyed by an incrementing id and reused across commands when
//! idle with a matching working directory. Each command's output is
//! demultiplexed into discrete, sanitized lines. A session whose shell
//! cannot be spawned with captured pipes loses "shell integration": the
//! command is still sent raw, but the session is evicted from the reuse
//! pool because an unknown-duration process may still be running in it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Notify, mpsc};

use scribe_utils::text::{is_command_echo, strip_ansi, strip_control_chars};

use crate::hot::HotTracker;
use crate::process::{ChildGuard, set_new_session};
use crate::shell::DetectedShell;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("terminal {id} not found")]
    NotFound { id: u32 },
    #[error("terminal {id} is busy")]
    Busy { id: u32 },
}

/// Lifecycle of one terminal session.
///
/// `AwaitingContinuation` means the consumer stopped reading lines while
/// the command keeps running in the background; its remaining output lands
/// in the retained buffer for later retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    AwaitingContinuation,
    Completed,
    Errored,
}

/// Events delivered by a running command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    Line(String),
    /// The shell could not be run with captured pipes; the command was sent
    /// raw and the session has been evicted from the reuse pool.
    NoShellIntegration,
    Completed {
        exit_code: Option<i32>,
    },
}

/// Snapshot of a session for scheduling decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalInfo {
    pub id: u32,
    pub cwd: PathBuf,
    pub busy: bool,
    pub last_command: String,
}

#[derive(Debug)]
struct SessionCore {
    state: SessionState,
    busy: bool,
    last_command: String,
    /// Lines emitted after the consumer detached, drained by
    /// `get_unretrieved_output`.
    retained: Vec<String>,
}

#[derive(Debug)]
struct Session {
    id: u32,
    cwd: PathBuf,
    core: Mutex<SessionCore>,
    hot: Mutex<HotTracker>,
    detached: AtomicBool,
    abort: Notify,
}

impl Session {
    fn new(id: u32, cwd: PathBuf) -> Self {
        Self {
            id,
            cwd,
            core: Mutex::new(SessionCore {
                state: SessionState::Idle,
                busy: false,
                last_command: String::new(),
                retained: Vec::new(),
            }),
            hot: Mutex::new(HotTracker::default()),
            detached: AtomicBool::new(false),
            abort: Notify::new(),
        }
    }

    fn info(&self) -> TerminalInfo {
        let core = self.core.lock().expect("session lock poisoned");
        TerminalInfo {
            id: self.id,
            cwd: self.cwd.clone(),
            busy: core.busy,
            last_command: core.last_command.clone(),
        }
    }
}

/// Handle to a running command: a line/event stream plus explicit
/// detach and abort controls. Dropping the handle does not kill the
/// command; call [`CommandHandle::abort`] for that.
pub struct CommandHandle {
    events: mpsc::Receiver<TerminalEvent>,
    session: Arc<Session>,
}

impl CommandHandle {
    /// Next event from the command, `None` once the stream is finished.
    pub async fn next_event(&mut self) -> Option<TerminalEvent> {
        self.events.recv().await
    }

    /// Stop consuming lines while the command keeps running. Later output
    /// is retained on the session for `get_unretrieved_output`.
    pub fn continue_output(&self) {
        self.session.detached.store(true, Ordering::SeqCst);
        let mut core = self.session.core.lock().expect("session lock poisoned");
        if core.state == SessionState::Running {
            core.state = SessionState::AwaitingContinuation;
        }
    }

    /// Kill the running command and its process group.
    pub fn abort(&self) {
        self.session.abort.notify_waiters();
    }

    #[must_use]
    pub fn terminal_id(&self) -> u32 {
        self.session.id
    }
}

/// Process-wide registry of terminal sessions.
pub struct TerminalManager {
    sessions: Mutex<HashMap<u32, Arc<Session>>>,
    next_id: AtomicU32,
    shell: DetectedShell,
}

impl TerminalManager {
    #[must_use]
    pub fn new(shell: DetectedShell) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            shell,
        }
    }

    /// Reuse an idle session whose working directory matches, or create a
    /// new one.
    pub fn get_or_create_terminal(&self, cwd: &Path) -> TerminalInfo {
        let mut sessions = self.sessions.lock().expect("registry lock poisoned");

        let reusable = sessions.values().find(|session| {
            let core = session.core.lock().expect("session lock poisoned");
            !core.busy && session.cwd == cwd
        });
        if let Some(session) = reusable {
            return session.info();
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session::new(id, cwd.to_path_buf()));
        let info = session.info();
        sessions.insert(id, session);
        info
    }

    /// Run `command` in the given session, returning a handle streaming its
    /// output line by line.
    pub fn run_command(&self, id: u32, command: &str) -> Result<CommandHandle, TerminalError> {
        let session = self.lookup(id)?;

        {
            let mut core = session.core.lock().expect("session lock poisoned");
            if core.busy {
                return Err(TerminalError::Busy { id });
            }
            core.busy = true;
            core.state = SessionState::Running;
            core.last_command = command.to_string();
            core.retained.clear();
        }
        session.detached.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut cmd = Command::new(&self.shell.binary);
        cmd.args(&self.shell.args)
            .arg(command)
            .current_dir(&session.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        set_new_session(&mut cmd);

        match cmd.spawn() {
            Ok(child) => {
                let pump_session = Arc::clone(&session);
                let pump_command = command.to_string();
                tokio::spawn(async move {
                    pump_output(child, pump_session, tx, pump_command).await;
                });
            }
            Err(e) => {
                // Capture is unavailable. Send the command raw (fire and
                // forget), signal the downgrade, and evict the session: it
                // cannot be safely reused while an unknown-duration process
                // may still be running.
                tracing::warn!(terminal = id, "shell spawn with pipes failed: {e}");
                self.send_raw(&session, command);
                self.evict(id);
                {
                    let mut core = session.core.lock().expect("session lock poisoned");
                    core.state = SessionState::Errored;
                    core.busy = false;
                }
                let _ = tx.try_send(TerminalEvent::NoShellIntegration);
            }
        }

        Ok(CommandHandle { events: rx, session })
    }

    /// Drain output retained since the consumer detached.
    pub fn get_unretrieved_output(&self, id: u32) -> String {
        let Ok(session) = self.lookup(id) else {
            return String::new();
        };
        let mut core = session.core.lock().expect("session lock poisoned");
        let lines = std::mem::take(&mut core.retained);
        lines.join("\n")
    }

    /// Current lifecycle state of a session.
    #[must_use]
    pub fn session_state(&self, id: u32) -> Option<SessionState> {
        self.lookup(id)
            .ok()
            .map(|session| session.core.lock().expect("session lock poisoned").state)
    }

    /// Whether the session is believed to still be producing output.
    #[must_use]
    pub fn is_hot(&self, id: u32) -> bool {
        self.lookup(id)
            .map(|session| session.hot.lock().expect("session lock poisoned").is_hot())
            .unwrap_or(false)
    }

    /// Sessions filtered by busy state, for environment snapshots.
    #[must_use]
    pub fn terminals(&self, busy: bool) -> Vec<TerminalInfo> {
        let sessions = self.sessions.lock().expect("registry lock poisoned");
        let mut out: Vec<TerminalInfo> = sessions
            .values()
            .map(|session| session.info())
            .filter(|info| info.busy == busy)
            .collect();
        out.sort_by_key(|info| info.id);
        out
    }

    /// Abort every running command and drop all sessions.
    pub fn dispose_all(&self) {
        let sessions = {
            let mut map = self.sessions.lock().expect("registry lock poisoned");
            std::mem::take(&mut *map)
        };
        for session in sessions.values() {
            session.abort.notify_waiters();
        }
    }

    fn lookup(&self, id: u32) -> Result<Arc<Session>, TerminalError> {
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(TerminalError::NotFound { id })
    }

    fn evict(&self, id: u32) {
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .remove(&id);
    }

    fn send_raw(&self, session: &Session, command: &str) {
        let mut cmd = Command::new(&self.shell.binary);
        cmd.args(&self.shell.args)
            .arg(command)
            .current_dir(&session.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        set_new_session(&mut cmd);
        if let Err(e) = cmd.spawn() {
            tracing::warn!(terminal = session.id, "raw command dispatch failed: {e}");
        }
    }
}

/// Read a command's stdout/stderr to completion, forwarding sanitized
/// lines while the consumer is attached and retaining them afterwards.
async fn pump_output(
    child: tokio::process::Child,
    session: Arc<Session>,
    tx: mpsc::Sender<TerminalEvent>,
    command: String,
) {
    let mut guard = ChildGuard::new(child);

    let stdout = guard.child_mut().stdout.take();
    let stderr = guard.child_mut().stderr.take();
    let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
        tracing::warn!(terminal = session.id, "command pipes missing after spawn");
        finish(&session, &tx, None, false).await;
        return;
    };

    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut out_done = false;
    let mut err_done = false;
    // The first emitted lines may just echo the command; drop them until
    // real output shows up.
    let mut saw_real_output = false;
    let mut aborted = false;

    // Register for abort once so a notify between loop iterations is not
    // lost.
    let abort_notified = session.abort.notified();
    tokio::pin!(abort_notified);

    while !(out_done && err_done) {
        let line = tokio::select! {
            () = &mut abort_notified => {
                aborted = true;
                break;
            }
            line = out_lines.next_line(), if !out_done => match line {
                Ok(Some(line)) => Some(line),
                _ => {
                    out_done = true;
                    None
                }
            },
            line = err_lines.next_line(), if !err_done => match line {
                Ok(Some(line)) => Some(line),
                _ => {
                    err_done = true;
                    None
                }
            },
        };

        let Some(raw) = line else { continue };
        let line = strip_control_chars(&strip_ansi(&raw));

        if !saw_real_output {
            if is_command_echo(&line, &command) {
                continue;
            }
            saw_real_output = true;
        }

        session
            .hot
            .lock()
            .expect("session lock poisoned")
            .record_output(&line);

        deliver(&session, &tx, line).await;
    }

    let exit_code = if aborted {
        // ChildGuard::drop kills the process group.
        None
    } else {
        let status = guard.child_mut().wait().await;
        guard.disarm();
        status.ok().and_then(|s| s.code())
    };

    finish(&session, &tx, exit_code, aborted).await;
}

async fn deliver(session: &Arc<Session>, tx: &mpsc::Sender<TerminalEvent>, line: String) {
    if session.detached.load(Ordering::SeqCst) {
        let mut core = session.core.lock().expect("session lock poisoned");
        core.retained.push(line);
        return;
    }
    if tx.send(TerminalEvent::Line(line.clone())).await.is_err() {
        // Receiver dropped without an explicit continue; retain from here.
        session.detached.store(true, Ordering::SeqCst);
        let mut core = session.core.lock().expect("session lock poisoned");
        core.retained.push(line);
    }
}

async fn finish(
    session: &Arc<Session>,
    tx: &mpsc::Sender<TerminalEvent>,
    exit_code: Option<i32>,
    aborted: bool,
) {
    {
        let mut core = session.core.lock().expect("session lock poisoned");
        core.state = if aborted {
            SessionState::Errored
        } else {
            SessionState::Completed
        };
        core.busy = false;
    }
    session.hot.lock().expect("session lock poisoned").cool_down();
    let _ = tx.send(TerminalEvent::Completed { exit_code }).await;
}
