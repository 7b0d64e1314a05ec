//! Session types: identifiers, lifecycle state, construction options and
//! command execution records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::PromptMetadata;

/// Unique identifier for a shell session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short form used for multiplexer session names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..12].to_string()
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Constructed, no process yet
    Uninitialized,
    /// Shell is at its prompt
    Idle,
    /// A command is in flight
    Running,
    /// The last command exceeded its timeout (transient)
    TimedOut,
    /// The last command was interrupted (transient)
    Interrupted,
    /// Session has been closed; terminal
    Closed,
}

impl SessionState {
    /// Name used in error messages and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::TimedOut => "timed_out",
            SessionState::Interrupted => "interrupted",
            SessionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one command submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Still executing (the wait was cancelled by the caller)
    Running,
    /// Prompt boundary observed, or the shell exited
    Completed,
    /// Timeout elapsed before the prompt reappeared
    TimedOut,
    /// Interrupted before completion
    Interrupted,
    /// Not submitted to the shell
    Rejected,
}

/// Options identifying the shell a session drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionOptions {
    /// Working directory the shell starts in (must exist)
    pub work_dir: PathBuf,
    /// Run the shell as this user (via `su`)
    pub username: Option<String>,
    /// Explicit shell executable; resolved from `PATH` when absent
    pub shell_path: Option<PathBuf>,
    /// Multiplexer session to create or reattach (tmux backend only)
    pub tmux_session: Option<String>,
}

impl SessionOptions {
    /// Options for a shell in `work_dir` with everything else defaulted.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            username: None,
            shell_path: None,
            tmux_session: None,
        }
    }

    /// Set the user the shell runs as.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set an explicit shell executable.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell_path = Some(shell.into());
        self
    }

    /// Name the multiplexer session (create or reattach).
    pub fn with_tmux_session(mut self, name: impl Into<String>) -> Self {
        self.tmux_session = Some(name.into());
        self
    }
}

/// Result of executing one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionRecord {
    /// Submitted text
    pub command: String,
    /// Whether a line terminator followed the text
    pub enter: bool,
    /// Outcome
    pub status: CommandStatus,
    /// Captured output with prompt sentinels removed
    pub output: String,
    /// Exit code reported by the shell
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Working directory reported by the prompt after the command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Full prompt metadata for completed commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PromptMetadata>,
    /// Submission time
    pub started_at: DateTime<Utc>,
    /// Finalization time
    pub finished_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Start a record for `command`; finalized with one of the `finish_*` methods.
    pub fn new(command: impl Into<String>, enter: bool) -> Self {
        let now = Utc::now();
        Self {
            command: command.into(),
            enter,
            status: CommandStatus::Running,
            output: String::new(),
            exit_code: None,
            working_dir: None,
            metadata: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Finalize with `status` and captured `output`.
    pub fn finish(mut self, status: CommandStatus, output: impl Into<String>) -> Self {
        self.status = status;
        self.output = output.into();
        self.finished_at = Utc::now();
        self
    }

    /// Attach the prompt metadata that closed this command.
    pub fn with_metadata(mut self, metadata: PromptMetadata) -> Self {
        self.exit_code = Some(metadata.exit_code);
        self.working_dir = Some(metadata.working_dir.clone());
        self.metadata = Some(metadata);
        self
    }

    /// Whether the command ran to completion.
    pub fn is_completed(&self) -> bool {
        self.status == CommandStatus::Completed
    }

    /// Wall-clock duration between submission and finalization.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_creation() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new();
        assert_eq!(format!("{id}").len(), 36);
        assert_eq!(id.short().len(), 12);
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::TimedOut.to_string(), "timed_out");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_session_options_builder() {
        let opts = SessionOptions::new("/tmp")
            .with_username("agent")
            .with_shell("/bin/bash");
        assert_eq!(opts.work_dir, PathBuf::from("/tmp"));
        assert_eq!(opts.username.as_deref(), Some("agent"));
        assert_eq!(opts.shell_path, Some(PathBuf::from("/bin/bash")));
        assert!(opts.tmux_session.is_none());
    }

    #[test]
    fn test_record_finish() {
        let record = ExecutionRecord::new("echo hi", true).finish(CommandStatus::TimedOut, "hi");
        assert_eq!(record.status, CommandStatus::TimedOut);
        assert_eq!(record.output, "hi");
        assert!(record.exit_code.is_none());
        assert!(!record.is_completed());
        assert!(record.duration() >= chrono::Duration::zero());
    }

    #[test]
    fn test_record_serialization() {
        let record = ExecutionRecord::new("ls", true).finish(CommandStatus::Rejected, "");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "rejected");
        assert!(json.get("exit_code").is_none());

        let back: ExecutionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.command, "ls");
    }
}
