//! Shell attached to a pseudo-terminal, using portable-pty.

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use shellbridge_core::{
    ControlKey, Error, PromptProtocol, Result, SessionConfig, SessionOptions,
};

use crate::ansi::AnsiStripper;
use crate::backend::{join_reader, wait_until, BackendKind, TerminalBackend};
use crate::buffer::{lock_buffer, OutputBuffer, SharedBuffer};
use crate::env::shell_env;
use crate::shell::{resolve_shell, ShellCommand, ShellFlavor};

/// Live pseudo-terminal and the shell attached to it.
struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    reader: Option<JoinHandle<()>>,
    flavor: ShellFlavor,
}

/// Backend driving a shell through a pseudo-terminal.
///
/// One blocking reader thread drains the master side through an
/// [`AnsiStripper`] into the shared buffer. Interrupts go to the foreground
/// process group, so they reach whatever the shell is running.
pub struct PtyBackend {
    options: SessionOptions,
    config: SessionConfig,
    buffer: SharedBuffer,
    process: Mutex<Option<PtyProcess>>,
    exit_code: Mutex<Option<i32>>,
    closed: AtomicBool,
    nonce: String,
}

impl std::fmt::Debug for PtyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyBackend")
            .field("work_dir", &self.options.work_dir)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl PtyBackend {
    /// Create an unstarted backend.
    pub fn new(options: SessionOptions, config: SessionConfig) -> Self {
        let buffer = OutputBuffer::shared(config.history_limit);
        Self {
            options,
            config,
            buffer,
            process: Mutex::new(None),
            exit_code: Mutex::new(None),
            closed: AtomicBool::new(false),
            nonce: PromptProtocol::new_nonce(),
        }
    }

    fn lock_process(&self) -> MutexGuard<'_, Option<PtyProcess>> {
        self.process.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn(&self) -> Result<PtyProcess> {
        let shell = resolve_shell(self.options.shell_path.as_deref())?;
        let command = ShellCommand::interactive(&shell, self.options.username.as_deref(), false);

        info!(
            "Spawning PTY: command='{}' args={:?}, dimensions={}x{}, cwd={}",
            command.program,
            command.args,
            self.config.rows,
            self.config.cols,
            self.options.work_dir.display()
        );

        let pty_system = native_pty_system();
        let pty_size = PtySize {
            rows: self.config.rows,
            cols: self.config.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system.openpty(pty_size).map_err(|e| {
            error!("Failed to open PTY: {}", e);
            Error::SpawnFailure(format!("Failed to open PTY: {e}"))
        })?;

        let mut cmd = CommandBuilder::new(&command.program);
        cmd.args(&command.args);
        cmd.cwd(&self.options.work_dir);
        cmd.env_clear();
        for (key, value) in shell_env(&self.config, command.flavor, &self.nonce) {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", command.program, e);
            Error::SpawnFailure(format!("Failed to spawn command: {e}"))
        })?;
        // The master must be the only remaining handle so reads end when
        // the shell exits.
        drop(pair.slave);

        let writer = pair.master.take_writer().map_err(|e| {
            error!("Failed to take PTY writer: {}", e);
            Error::SpawnFailure(format!("Failed to take writer: {e}"))
        })?;

        let reader = pair.master.try_clone_reader().map_err(|e| {
            error!("Failed to clone PTY reader: {}", e);
            Error::SpawnFailure(format!("Failed to clone reader: {e}"))
        })?;

        let reader = spawn_reader(reader, self.buffer.clone())?;

        info!("PTY spawned successfully: pid={:?}", child.process_id());

        Ok(PtyProcess {
            master: pair.master,
            child,
            writer,
            reader: Some(reader),
            flavor: command.flavor,
        })
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.lock_process();
        let process = guard.as_mut().ok_or_else(|| self.not_running())?;
        debug!("Writing {} bytes to PTY", data.len());
        process.writer.write_all(data)?;
        process.writer.flush()?;
        Ok(())
    }

    fn not_running(&self) -> Error {
        if self.closed.load(Ordering::SeqCst) {
            Error::SessionClosed
        } else {
            Error::NotInitialized
        }
    }

    fn record_exit(&self, code: i32) {
        let mut exit_code = self.exit_code.lock().unwrap_or_else(|p| p.into_inner());
        if exit_code.is_none() {
            info!("Shell exited with code {}", code);
            *exit_code = Some(code);
        }
    }

    /// Send SIGINT to the terminal's foreground process group.
    #[cfg(unix)]
    fn signal_foreground(process: &PtyProcess) -> bool {
        let Some(fd) = process.master.as_raw_fd() else {
            return false;
        };
        // SAFETY: fd belongs to the master held by `process` for the duration
        // of the call.
        let pgrp = unsafe { libc::tcgetpgrp(fd) };
        if pgrp <= 0 {
            debug!("tcgetpgrp failed on PTY master {}", fd);
            return false;
        }
        // SAFETY: plain signal delivery to a process group id.
        let result = unsafe { libc::killpg(pgrp, libc::SIGINT) };
        if result == 0 {
            debug!("Sent SIGINT to foreground process group {}", pgrp);
            true
        } else {
            warn!("killpg({}, SIGINT) failed", pgrp);
            false
        }
    }

    #[cfg(not(unix))]
    fn signal_foreground(_process: &PtyProcess) -> bool {
        false
    }

    /// Ask the shell to hang up.
    #[cfg(unix)]
    fn hang_up(process: &mut PtyProcess) {
        if let Some(pid) = process.child.process_id() {
            // SAFETY: plain signal delivery to the child pid.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGHUP);
            }
            debug!("Sent SIGHUP to shell pid {}", pid);
        }
    }

    #[cfg(not(unix))]
    fn hang_up(process: &mut PtyProcess) {
        let _ = process.child.kill();
    }
}

/// Start the blocking reader thread for a PTY master.
fn spawn_reader(mut reader: Box<dyn Read + Send>, buffer: SharedBuffer) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("shellbridge-pty-reader".to_string())
        .spawn(move || {
            let mut stripper = AnsiStripper::new();
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => {
                        debug!("PTY reader reached EOF");
                        break;
                    }
                    Ok(n) => {
                        let text = stripper.feed(&chunk[..n]);
                        if !text.is_empty() {
                            lock_buffer(&buffer).push_str(&text);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO is the normal way a Linux PTY reports a hung-up slave.
                        debug!("PTY reader stopped: {}", e);
                        break;
                    }
                }
            }
        })
        .map_err(|e| Error::SpawnFailure(format!("Failed to start PTY reader: {e}")))
}

impl TerminalBackend for PtyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Pty
    }

    fn initialize(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        let mut guard = self.lock_process();
        if guard.is_some() {
            debug!("PTY backend already initialized");
            return Ok(());
        }

        let mut process = self.spawn()?;
        let mut setup = match process.flavor {
            ShellFlavor::PowerShell => String::new(),
            _ => "stty -echo".to_string(),
        };
        if let Some(directive) = process.flavor.prompt_directive(&self.nonce) {
            if !setup.is_empty() {
                setup.push_str("; ");
            }
            setup.push_str(&directive);
        }
        setup.push_str(process.flavor.line_ending());
        process.writer.write_all(setup.as_bytes())?;
        process.writer.flush()?;
        *guard = Some(process);
        drop(guard);

        std::thread::sleep(self.config.init_settle());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(mut process) = self.lock_process().take() else {
            return Ok(());
        };
        info!("Closing PTY backend");

        Self::hang_up(&mut process);
        let grace = self.config.close_grace();
        let exited = wait_until(grace, || matches!(process.child.try_wait(), Ok(Some(_))));
        if !exited {
            warn!("Shell ignored SIGHUP for {:?}, killing", grace);
            if let Err(e) = process.child.kill() {
                debug!("Kill failed: {}", e);
            }
        }
        if let Ok(status) = process.child.wait() {
            self.record_exit(status.exit_code() as i32);
        }

        let PtyProcess {
            master,
            writer,
            reader,
            ..
        } = process;
        drop(writer);
        drop(master);
        if let Some(reader) = reader {
            join_reader(reader, grace);
        }
        Ok(())
    }

    fn send_keys(&self, text: &str, enter: bool) -> Result<()> {
        if let Some(key) = ControlKey::parse(text) {
            debug!("Sending control key {}", key);
            return self.write(&[key.to_byte()]);
        }
        let line_ending = self
            .lock_process()
            .as_ref()
            .map(|p| p.flavor.line_ending())
            .unwrap_or("\n");
        let mut data = text.to_string();
        if enter {
            data.push_str(line_ending);
        }
        self.write(data.as_bytes())
    }

    fn read_screen(&self) -> String {
        lock_buffer(&self.buffer).contents()
    }

    fn clear_screen(&self) -> Result<()> {
        lock_buffer(&self.buffer).clear();
        Ok(())
    }

    fn interrupt(&self) -> Result<bool> {
        {
            let guard = self.lock_process();
            let process = guard.as_ref().ok_or_else(|| self.not_running())?;
            if Self::signal_foreground(process) {
                return Ok(true);
            }
        }
        debug!("Falling back to writing ETX for interrupt");
        self.write(&[ControlKey::Interrupt.to_byte()])?;
        Ok(true)
    }

    fn is_alive(&self) -> bool {
        let mut guard = self.lock_process();
        let Some(process) = guard.as_mut() else {
            return false;
        };
        match process.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.record_exit(status.exit_code() as i32);
                false
            }
            Err(e) => {
                warn!("Failed to poll shell status: {}", e);
                false
            }
        }
    }

    fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn prompt_nonce(&self) -> &str {
        &self.nonce
    }
}

impl Drop for PtyBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close PTY backend: {}", e);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn backend() -> PtyBackend {
        let mut config = SessionConfig::default();
        config.close_grace_ms = 500;
        PtyBackend::new(SessionOptions::new(std::env::temp_dir()), config)
    }

    fn wait_for(backend: &PtyBackend, needle: &str) -> bool {
        wait_until(Duration::from_secs(10), || backend.read_screen().contains(needle))
    }

    #[test]
    fn test_send_before_initialize() {
        let backend = backend();
        assert!(matches!(
            backend.send_keys("echo hi", true),
            Err(Error::NotInitialized)
        ));
        assert!(!backend.is_alive());
    }

    #[test]
    fn test_pty_spawn_and_prompt() {
        let backend = backend();
        backend.initialize().unwrap();
        assert!(backend.is_alive());
        assert!(wait_until(Duration::from_secs(10), || {
            PromptProtocol::trailing_prompt(&backend.read_screen(), backend.prompt_nonce())
                .is_some()
        }));
        assert!(!backend.is_running());
        backend.close().unwrap();
    }

    #[test]
    fn test_pty_write_and_read() {
        let backend = backend();
        backend.initialize().unwrap();
        backend.send_keys("echo pty-$((40 + 2))", true).unwrap();
        assert!(wait_for(&backend, "pty-42"));
        backend.close().unwrap();
    }

    #[test]
    fn test_forged_prompt_keeps_command_running() {
        let backend = backend();
        backend.initialize().unwrap();
        backend
            .send_keys(
                r#"printf '\n###PS1JSON###\n{"exit_code": "7", "working_dir": "/fake"}\n###PS1END###\n'; sleep 30"#,
                true,
            )
            .unwrap();
        assert!(wait_for(&backend, "/fake"));
        std::thread::sleep(Duration::from_millis(200));
        assert!(backend.is_running());
        backend.interrupt().unwrap();
        backend.close().unwrap();
    }

    #[test]
    fn test_interrupt_stops_foreground_command() {
        let backend = backend();
        backend.initialize().unwrap();
        backend.send_keys("sleep 30", true).unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert!(backend.is_running());
        assert!(backend.interrupt().unwrap());
        assert!(wait_until(Duration::from_secs(10), || !backend.is_running()));
        backend.close().unwrap();
    }

    #[test]
    fn test_exit_code_reported() {
        let backend = backend();
        backend.initialize().unwrap();
        backend.send_keys("exit 3", true).unwrap();
        assert!(wait_until(Duration::from_secs(10), || !backend.is_alive()));
        assert_eq!(backend.exit_code(), Some(3));
        backend.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let backend = backend();
        backend.initialize().unwrap();
        backend.close().unwrap();
        backend.close().unwrap();
        assert!(!backend.is_alive());
        assert!(matches!(backend.initialize(), Err(Error::SessionClosed)));
    }

    #[test]
    fn test_clear_screen() {
        let backend = backend();
        backend.initialize().unwrap();
        backend.send_keys("echo before", true).unwrap();
        assert!(wait_for(&backend, "before"));
        backend.clear_screen().unwrap();
        assert!(!backend.read_screen().contains("before"));
        backend.close().unwrap();
    }
}
