use serde::{Deserialize, Serialize};

/// A persisted, user-authored launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalDefinition {
    pub id: String,
    pub name: String,
    #[serde(rename = "path")]
    pub working_directory: String,
    pub command: String,
    pub created_at: String,
    #[serde(default)]
    pub last_run: Option<String>,
}

/// Input of `add_terminal` / `update_terminal`, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminalDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Stopped,
    Error,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Error => "error",
        }
    }
}

/// What callers see: the definition joined with its live runtime state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalView {
    pub id: String,
    pub name: String,
    pub path: String,
    pub command: String,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub started_at: Option<String>,
    pub created_at: String,
    pub last_run: Option<String>,
    /// Whole seconds of the current (or last) run.
    pub running_time: u64,
    pub last_exit_code: Option<i32>,
}
