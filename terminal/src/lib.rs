//! Terminal process management for Scribe.
//!
//! A process-wide registry of reusable terminal sessions. Commands run in a
//! detected shell with captured pipes; output is demultiplexed into
//! sanitized lines and the session's "hot" state tracks whether it is still
//! producing output (used to delay dependent environment reads).

pub mod hot;
pub mod manager;
pub mod process;
pub mod shell;

pub use hot::HotTracker;
pub use manager::{
    CommandHandle, SessionState, TerminalError, TerminalEvent, TerminalInfo, TerminalManager,
};
pub use shell::{DetectedShell, detect_shell};
