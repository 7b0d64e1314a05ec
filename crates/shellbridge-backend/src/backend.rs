//! The contract every shell backend implements.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use shellbridge_core::{PromptProtocol, Result};
use tracing::{debug, warn};

/// Concrete backend variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Shell attached to a pseudo-terminal
    Pty,
    /// Shell running in a tmux pane
    Tmux,
    /// Shell with plain stdin/stdout/stderr pipes
    Pipe,
}

impl BackendKind {
    /// Lowercase name, as accepted on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Pty => "pty",
            BackendKind::Tmux => "tmux",
            BackendKind::Pipe => "pipe",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A running interactive shell and its captured output.
///
/// All methods take `&self`; implementations synchronize internally so one
/// thread can wait on output while another interrupts or closes.
pub trait TerminalBackend: Send + Sync + std::fmt::Debug {
    /// Which variant this is.
    fn kind(&self) -> BackendKind;

    /// Spawn the shell, install the prompt and start the reader(s).
    ///
    /// Calling it again on an initialized backend does nothing.
    fn initialize(&self) -> Result<()>;

    /// Terminate the shell and release readers and input handles.
    ///
    /// Idempotent.
    fn close(&self) -> Result<()>;

    /// Send text (or a control key such as `C-c`) to the shell, optionally
    /// followed by a line terminator.
    fn send_keys(&self, text: &str, enter: bool) -> Result<()>;

    /// Current buffer contents. Never blocks waiting for new output.
    fn read_screen(&self) -> String;

    /// Empty the output buffer.
    fn clear_screen(&self) -> Result<()>;

    /// Deliver an interrupt to the foreground command.
    ///
    /// Returns whether the backend was able to deliver one.
    fn interrupt(&self) -> Result<bool>;

    /// Whether the shell process is still alive.
    fn is_alive(&self) -> bool;

    /// Exit status of the shell once it has exited.
    fn exit_code(&self) -> Option<i32>;

    /// Token embedded in every prompt this backend's shell renders.
    fn prompt_nonce(&self) -> &str;

    /// Whether a command is executing: the shell is alive and the screen
    /// does not end with a complete prompt of this shell.
    fn is_running(&self) -> bool {
        self.is_alive()
            && PromptProtocol::trailing_prompt(&self.read_screen(), self.prompt_nonce()).is_none()
    }
}

/// Join a reader thread, giving up after `timeout`.
///
/// A reader still blocked in a read after the timeout is detached.
pub(crate) fn join_reader(handle: JoinHandle<()>, timeout: Duration) {
    let name = handle.thread().name().unwrap_or("reader").to_string();
    let deadline = Instant::now().checked_add(timeout);
    while !handle.is_finished() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            warn!("Reader thread '{}' still blocked after {:?}, detaching", name, timeout);
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        warn!("Reader thread '{}' panicked", name);
    } else {
        debug!("Reader thread '{}' joined", name);
    }
}

/// Poll `done` until it returns true or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if done() {
            return true;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::Pty.to_string(), "pty");
        assert_eq!(BackendKind::Tmux.to_string(), "tmux");
        assert_eq!(BackendKind::Pipe.to_string(), "pipe");
    }

    #[test]
    fn test_join_reader_finished_thread() {
        let handle = std::thread::Builder::new()
            .name("quick".to_string())
            .spawn(|| {})
            .unwrap();
        join_reader(handle, Duration::from_secs(1));
    }

    #[test]
    fn test_join_reader_detaches_blocked_thread() {
        let handle = std::thread::spawn(|| std::thread::sleep(Duration::from_secs(2)));
        let start = Instant::now();
        join_reader(handle, Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_until() {
        assert!(wait_until(Duration::from_millis(10), || true));
        assert!(!wait_until(Duration::from_millis(30), || false));
    }

    #[test]
    fn test_unbounded_timeouts_do_not_overflow() {
        let mut polls = 0;
        assert!(wait_until(Duration::MAX, || {
            polls += 1;
            polls == 3
        }));
        let handle = std::thread::spawn(|| std::thread::sleep(Duration::from_millis(30)));
        join_reader(handle, Duration::MAX);
    }
}
