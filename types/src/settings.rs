//! User-configurable approval policy.

use serde::{Deserialize, Serialize};

use crate::blocks::ToolUseName;

/// Which tool families may bypass the human yes/no gate, and how many
/// consecutive bypasses are allowed before a forced checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoApprovalSettings {
    pub enabled: bool,
    pub read_files: bool,
    pub edit_files: bool,
    pub execute_commands: bool,
    pub use_browser: bool,
    /// Consecutive auto-approved requests permitted before the task stops
    /// for a human checkpoint.
    pub max_requests: u32,
}

impl Default for AutoApprovalSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            read_files: false,
            edit_files: false,
            execute_commands: false,
            use_browser: false,
            max_requests: 20,
        }
    }
}

impl AutoApprovalSettings {
    /// Whether the given tool may run without asking.
    #[must_use]
    pub fn allows(&self, tool: ToolUseName) -> bool {
        if !self.enabled {
            return false;
        }
        match tool {
            ToolUseName::ReadFile | ToolUseName::ListFiles | ToolUseName::SearchFiles => {
                self.read_files
            }
            ToolUseName::WriteToFile | ToolUseName::ReplaceInFile => self.edit_files,
            ToolUseName::ExecuteCommand => self.execute_commands,
            ToolUseName::BrowserAction => self.use_browser,
            // Conversational tools always reach the user directly.
            ToolUseName::AskFollowupQuestion | ToolUseName::AttemptCompletion => false,
        }
    }
}
