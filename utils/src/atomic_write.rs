//! Atomic file write helper.
//!
//! Uses a temp file + rename in the destination's parent directory, so a
//! crash mid-write never leaves a torn file at the canonical path.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Write `contents` to `path` atomically, creating parent directories as
/// needed.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no parent directory: {}", path.display()),
        )
    })?;
    fs::create_dir_all(parent)?;

    // The temp file must live in the same directory as the target so the
    // final rename stays on one filesystem.
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| {
        tracing::warn!(path = %path.display(), "atomic persist failed: {}", e.error);
        e.error
    })?;
    Ok(())
}
