//! Shared utilities: atomic file writes and terminal text sanitisation.

pub mod atomic_write;
pub mod text;

pub use atomic_write::atomic_write;
pub use text::{is_command_echo, strip_ansi, strip_control_chars};
