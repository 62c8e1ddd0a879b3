//! "Hot" terminal classification.
//!
//! A session is hot while it is believed to still be producing output.
//! Plain output keeps a session hot for a short window; compiler-style
//! output (without a matching completion marker) extends the window, since
//! builds go quiet for long stretches between lines. The environment
//! snapshotter uses this signal to delay reads that depend on command
//! completion.

use std::time::{Duration, Instant};

const HOT_TIMEOUT_NORMAL: Duration = Duration::from_secs(2);
const HOT_TIMEOUT_COMPILING: Duration = Duration::from_secs(15);

const COMPILING_MARKERS: [&str; 6] = [
    "compiling",
    "building",
    "bundling",
    "transpiling",
    "generating",
    "starting",
];

const COMPLETION_MARKERS: [&str; 9] = [
    "compiled", "success", "finish", "complete", "succeed", "done", "end", "stop", "exit",
];

/// Tracks how long a session should be considered hot.
#[derive(Debug, Clone, Copy, Default)]
pub struct HotTracker {
    hot_until: Option<Instant>,
}

impl HotTracker {
    /// Record a chunk of output, extending the hot window.
    pub fn record_output(&mut self, chunk: &str) {
        let lower = chunk.to_lowercase();
        let compiling = COMPILING_MARKERS.iter().any(|m| lower.contains(m))
            && !COMPLETION_MARKERS.iter().any(|m| lower.contains(m));
        let timeout = if compiling {
            HOT_TIMEOUT_COMPILING
        } else {
            HOT_TIMEOUT_NORMAL
        };
        self.hot_until = Some(Instant::now() + timeout);
    }

    /// Clear the hot state, e.g. when the command completes.
    pub fn cool_down(&mut self) {
        self.hot_until = None;
    }

    #[must_use]
    pub fn is_hot(&self) -> bool {
        self.hot_until.is_some_and(|until| Instant::now() < until)
    }
}

#[cfg(test)]
mod tests {
    use super::HotTracker;

    #[test]
    fn fresh_tracker_is_cold() {
        assert!(!HotTracker::default().is_hot());
    }

    #[test]
    fn output_makes_session_hot() {
        let mut tracker = HotTracker::default();
        tracker.record_output("some output");
        assert!(tracker.is_hot());
    }

    #[test]
    fn cool_down_clears_hot_state() {
        let mut tracker = HotTracker::default();
        tracker.record_output("Compiling scribe v0.0.0");
        tracker.cool_down();
        assert!(!tracker.is_hot());
    }

    #[test]
    fn completion_marker_neutralizes_compiling_marker() {
        // Both markers present: the chunk is treated as normal output, so
        // only the short window applies. We can't observe the duration
        // directly without sleeping; assert hot-now as a sanity check.
        let mut tracker = HotTracker::default();
        tracker.record_output("Compiling done");
        assert!(tracker.is_hot());
    }
}
