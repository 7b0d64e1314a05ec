//! Shell running inside a detached tmux session.
//!
//! The pane is the source of truth: a reader thread captures it on an
//! interval and replaces the buffer whenever the capture changes. Keys go in
//! through `tmux send-keys`.

use std::process::{Command, Output};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use shellbridge_core::{
    ControlKey, Error, PromptProtocol, Result, SessionConfig, SessionOptions,
};

use crate::backend::{join_reader, wait_until, BackendKind, TerminalBackend};
use crate::buffer::{lock_buffer, OutputBuffer, SharedBuffer};
use crate::env::shell_env;
use crate::shell::{find_in_path, resolve_shell, ShellCommand, ShellFlavor};

/// Prefix of generated tmux session names.
pub const SESSION_PREFIX: &str = "shellbridge-";

/// Whether a `tmux` executable is on `PATH`.
pub fn tmux_available() -> bool {
    find_in_path("tmux").is_some()
}

/// Run one tmux command, failing on a non-zero exit status.
fn tmux(args: &[&str]) -> Result<Output> {
    let output = tmux_raw(args)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Backend(format!(
            "tmux {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(output)
}

/// Run one tmux command and return its output whatever the exit status.
fn tmux_raw(args: &[&str]) -> Result<Output> {
    Command::new("tmux")
        .args(args)
        .output()
        .map_err(|e| Error::Backend(format!("Failed to run tmux: {e}")))
}

fn session_exists(name: &str) -> bool {
    tmux_raw(&["has-session", "-t", name])
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Query one pane format variable such as `#{pane_pid}`.
fn pane_format(target: &str, format: &str) -> Option<String> {
    let output = tmux(&["display-message", "-p", "-t", target, format]).ok()?;
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Drop the blank rows tmux reports below the cursor, keeping one newline.
fn trim_capture(raw: &str) -> String {
    let trimmed = raw.trim_end_matches(['\n', ' ']);
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

/// Poll-based pane reader.
struct PaneReader {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Backend driving a shell through a tmux session.
pub struct TmuxBackend {
    config: SessionConfig,
    options: SessionOptions,
    session_name: String,
    buffer: SharedBuffer,
    reader: Mutex<Option<PaneReader>>,
    exit_code: Mutex<Option<i32>>,
    initialized: AtomicBool,
    closed: AtomicBool,
    nonce: String,
}

impl std::fmt::Debug for TmuxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmuxBackend")
            .field("session_name", &self.session_name)
            .field("work_dir", &self.options.work_dir)
            .finish_non_exhaustive()
    }
}

impl TmuxBackend {
    /// Create an unstarted backend. The tmux session is named after
    /// `options.tmux_session`, or `shellbridge-<uuid>` when none is given.
    pub fn new(options: SessionOptions, config: SessionConfig) -> Self {
        let session_name = options
            .tmux_session
            .clone()
            .unwrap_or_else(|| format!("{SESSION_PREFIX}{}", uuid::Uuid::new_v4().simple()));
        let buffer = OutputBuffer::shared(config.history_limit);
        Self {
            config,
            options,
            session_name,
            buffer,
            reader: Mutex::new(None),
            exit_code: Mutex::new(None),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            nonce: PromptProtocol::new_nonce(),
        }
    }

    /// Name of the tmux session this backend drives.
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    fn lock_reader(&self) -> MutexGuard<'_, Option<PaneReader>> {
        self.reader.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_started(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    fn create_session(&self) -> Result<()> {
        let shell = resolve_shell(self.options.shell_path.as_deref())?;
        let command = ShellCommand::interactive(&shell, self.options.username.as_deref(), true);
        let env = shell_env(&self.config, command.flavor, &self.nonce);
        let launch = command.to_command_line_with_env(&env);
        let work_dir = self.options.work_dir.to_string_lossy().to_string();
        let cols = self.config.cols.to_string();
        let rows = self.config.rows.to_string();

        info!(
            "Creating tmux session '{}' ({}x{}) in {}",
            self.session_name, rows, cols, work_dir
        );
        tmux(&[
            "new-session",
            "-d",
            "-s",
            &self.session_name,
            "-c",
            &work_dir,
            "-x",
            &cols,
            "-y",
            &rows,
            &launch,
        ])
        .map_err(|e| Error::SpawnFailure(e.to_string()))?;

        tmux(&[
            "set-window-option",
            "-t",
            &self.session_name,
            "remain-on-exit",
            "on",
        ])?;

        self.install_prompt(command.flavor)
    }

    /// Point the pane's prompt at this backend's nonce.
    fn install_prompt(&self, flavor: ShellFlavor) -> Result<()> {
        if let Some(directive) = flavor.prompt_directive(&self.nonce) {
            self.send_literal(&directive)?;
            self.send_named("Enter")?;
        }
        Ok(())
    }

    /// Take over a pane left by an earlier driver, whose prompt carries that
    /// driver's nonce.
    fn reattach(&self) -> Result<()> {
        info!("Reattaching to existing tmux session '{}'", self.session_name);
        let shell = resolve_shell(self.options.shell_path.as_deref())?;
        let flavor = ShellFlavor::from_path(&shell);
        let pane = tmux(&["capture-pane", "-p", "-J", "-t", &self.session_name])?;
        if !PromptProtocol::ends_with_prompt(&String::from_utf8_lossy(&pane.stdout)) {
            warn!(
                "Tmux session '{}' is busy; prompt update queued behind the running command",
                self.session_name
            );
        }
        self.install_prompt(flavor)
    }

    fn send_literal(&self, text: &str) -> Result<()> {
        debug!("Sending {} bytes to tmux session '{}'", text.len(), self.session_name);
        tmux(&["send-keys", "-t", &self.session_name, "-l", text])?;
        Ok(())
    }

    fn send_named(&self, key: &str) -> Result<()> {
        tmux(&["send-keys", "-t", &self.session_name, key])?;
        Ok(())
    }

    fn start_reader(&self) -> Result<PaneReader> {
        let stop = Arc::new(AtomicBool::new(false));
        let session = self.session_name.clone();
        let buffer = self.buffer.clone();
        let interval = self.config.tmux_poll_interval();
        let history = format!("-{}", self.config.history_limit);
        let flag = stop.clone();

        let handle = std::thread::Builder::new()
            .name("shellbridge-tmux-reader".to_string())
            .spawn(move || {
                let mut last = String::new();
                while !flag.load(Ordering::SeqCst) {
                    match tmux(&["capture-pane", "-p", "-J", "-S", &history, "-t", &session]) {
                        Ok(output) => {
                            let capture = trim_capture(&String::from_utf8_lossy(&output.stdout));
                            if capture != last {
                                debug!("Tmux pane content changed: {} bytes", capture.len());
                                lock_buffer(&buffer).replace(&capture);
                                last = capture;
                            }
                        }
                        Err(e) => {
                            debug!("Tmux reader stopped: {}", e);
                            break;
                        }
                    }
                    std::thread::sleep(interval);
                }
            })
            .map_err(|e| Error::SpawnFailure(format!("Failed to start tmux reader: {e}")))?;

        Ok(PaneReader { stop, handle })
    }

    fn pane_dead(&self) -> Option<bool> {
        pane_format(&self.session_name, "#{pane_dead}").map(|v| v == "1")
    }

    fn record_exit(&self) {
        let mut exit_code = self.exit_code.lock().unwrap_or_else(|p| p.into_inner());
        if exit_code.is_some() {
            return;
        }
        let code = pane_format(&self.session_name, "#{pane_dead_status}")
            .and_then(|v| v.parse::<i32>().ok());
        if let Some(code) = code {
            info!("Shell in tmux session '{}' exited with code {}", self.session_name, code);
            *exit_code = Some(code);
        }
    }

    #[cfg(unix)]
    fn hang_up(&self) {
        let pid = pane_format(&self.session_name, "#{pane_pid}")
            .and_then(|v| v.parse::<libc::pid_t>().ok());
        if let Some(pid) = pid {
            // SAFETY: plain signal delivery to the pane's shell pid.
            unsafe {
                libc::kill(pid, libc::SIGHUP);
            }
            debug!("Sent SIGHUP to pane pid {}", pid);
        }
    }

    #[cfg(not(unix))]
    fn hang_up(&self) {}
}

impl TerminalBackend for TmuxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Tmux
    }

    fn initialize(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        let mut reader = self.lock_reader();
        if self.initialized.load(Ordering::SeqCst) {
            debug!("Tmux backend already initialized");
            return Ok(());
        }
        if !tmux_available() {
            return Err(Error::BackendUnavailable("tmux is not installed".to_string()));
        }

        if session_exists(&self.session_name) {
            self.reattach()?;
        } else {
            self.create_session()?;
        }

        *reader = Some(self.start_reader()?);
        self.initialized.store(true, Ordering::SeqCst);
        drop(reader);

        std::thread::sleep(self.config.init_settle());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let reader = self.lock_reader().take();
        if !self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing tmux session '{}'", self.session_name);

        let grace = self.config.close_grace();
        if session_exists(&self.session_name) {
            if self.pane_dead() != Some(true) {
                self.hang_up();
                wait_until(grace, || self.pane_dead() != Some(false));
            }
            self.record_exit();
            if let Err(e) = tmux(&["kill-session", "-t", &self.session_name]) {
                warn!("Tmux kill-session failed: {}", e);
            }
        }

        if let Some(reader) = reader {
            reader.stop.store(true, Ordering::SeqCst);
            join_reader(reader.handle, grace);
        }
        Ok(())
    }

    fn send_keys(&self, text: &str, enter: bool) -> Result<()> {
        self.ensure_started()?;
        if let Some(key) = ControlKey::parse(text) {
            debug!("Sending control key {}", key);
            return self.send_named(key.tmux_name());
        }
        if !text.is_empty() {
            self.send_literal(text)?;
        }
        if enter {
            self.send_named("Enter")?;
        }
        Ok(())
    }

    fn read_screen(&self) -> String {
        lock_buffer(&self.buffer).contents()
    }

    fn clear_screen(&self) -> Result<()> {
        self.ensure_started()?;
        self.send_named(ControlKey::ClearScreen.tmux_name())?;
        tmux(&["clear-history", "-t", &self.session_name])?;
        lock_buffer(&self.buffer).clear();
        Ok(())
    }

    fn interrupt(&self) -> Result<bool> {
        self.ensure_started()?;
        self.send_named(ControlKey::Interrupt.tmux_name())?;
        Ok(true)
    }

    fn is_alive(&self) -> bool {
        if !self.initialized.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return false;
        }
        match self.pane_dead() {
            Some(false) => true,
            Some(true) => {
                self.record_exit();
                false
            }
            None => false,
        }
    }

    fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn prompt_nonce(&self) -> &str {
        &self.nonce
    }
}

impl Drop for TmuxBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close tmux backend: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TEST_WAIT: Duration = Duration::from_secs(10);

    #[test]
    fn test_trim_capture() {
        assert_eq!(trim_capture("a\nb\n\n\n   \n"), "a\nb\n");
        assert_eq!(trim_capture("\n\n"), "");
        assert_eq!(trim_capture("$ "), "$\n");
    }

    #[test]
    fn test_generated_session_name() {
        let backend = TmuxBackend::new(
            SessionOptions::new(std::env::temp_dir()),
            SessionConfig::default(),
        );
        assert!(backend.session_name().starts_with(SESSION_PREFIX));
        assert!(!backend.is_alive());
    }

    #[test]
    fn test_named_session() {
        let options = SessionOptions::new(std::env::temp_dir()).with_tmux_session("work");
        let backend = TmuxBackend::new(options, SessionConfig::default());
        assert_eq!(backend.session_name(), "work");
    }

    #[test]
    fn test_send_before_initialize() {
        let backend = TmuxBackend::new(
            SessionOptions::new(std::env::temp_dir()),
            SessionConfig::default(),
        );
        assert!(matches!(backend.send_keys("ls", true), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_tmux_round_trip() {
        if !tmux_available() {
            eprintln!("tmux not installed, skipping");
            return;
        }
        let backend = TmuxBackend::new(
            SessionOptions::new(std::env::temp_dir()),
            SessionConfig::default(),
        );
        backend.initialize().unwrap();
        assert!(wait_until(TEST_WAIT, || {
            PromptProtocol::trailing_prompt(&backend.read_screen(), backend.prompt_nonce())
                .is_some()
        }));

        backend.send_keys("echo tmux-$((6 * 7))", true).unwrap();
        assert!(wait_until(TEST_WAIT, || backend.read_screen().contains("tmux-42")));

        backend.send_keys("exit 3", true).unwrap();
        assert!(wait_until(TEST_WAIT, || !backend.is_alive()));
        assert_eq!(backend.exit_code(), Some(3));

        backend.close().unwrap();
        assert!(!session_exists(backend.session_name()));
    }

    #[test]
    fn test_reattach_installs_own_prompt() {
        if !tmux_available() {
            eprintln!("tmux not installed, skipping");
            return;
        }
        let name = format!("{SESSION_PREFIX}reattach-{}", uuid::Uuid::new_v4().simple());
        let options = SessionOptions::new(std::env::temp_dir()).with_tmux_session(&name);
        let first = TmuxBackend::new(options.clone(), SessionConfig::default());
        first.initialize().unwrap();
        assert!(wait_until(TEST_WAIT, || {
            PromptProtocol::trailing_prompt(&first.read_screen(), first.prompt_nonce()).is_some()
        }));

        let second = TmuxBackend::new(options, SessionConfig::default());
        assert_ne!(first.prompt_nonce(), second.prompt_nonce());
        second.initialize().unwrap();
        assert!(wait_until(TEST_WAIT, || {
            PromptProtocol::trailing_prompt(&second.read_screen(), second.prompt_nonce())
                .is_some()
        }));
        assert!(!second.is_running());

        second.close().unwrap();
        first.close().unwrap();
        assert!(!session_exists(&name));
    }
}
