//! Shell with plain stdin/stdout/stderr pipes.
//!
//! This is the backend for platforms without a usable pseudo-terminal. There
//! is no terminal line discipline, so interrupts cannot be delivered and
//! control keys have no effect.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
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

struct PipeProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    readers: Vec<JoinHandle<()>>,
    flavor: ShellFlavor,
}

/// Backend driving a shell over pipes.
///
/// Stdout and stderr each get a reader thread. Both append to the same
/// buffer under its lock, so interleaving follows arrival order.
pub struct PipeBackend {
    options: SessionOptions,
    config: SessionConfig,
    buffer: SharedBuffer,
    process: Mutex<Option<PipeProcess>>,
    exit_code: Mutex<Option<i32>>,
    closed: AtomicBool,
    nonce: String,
}

impl std::fmt::Debug for PipeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeBackend")
            .field("work_dir", &self.options.work_dir)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Start a reader that moves one byte at a time from `source` into `buffer`.
///
/// Single-byte reads keep a prompt that is not newline terminated from
/// sitting in a pipe buffer.
fn spawn_reader<R>(name: &str, mut source: R, buffer: SharedBuffer) -> Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let thread_name = format!("shellbridge-{name}-reader");
    let stream = name.to_string();
    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let mut stripper = AnsiStripper::new();
            let mut byte = [0u8; 1];
            loop {
                match source.read(&mut byte) {
                    Ok(0) => {
                        debug!("{} reader reached EOF", stream);
                        break;
                    }
                    Ok(_) => {
                        let text = stripper.feed(&byte);
                        if !text.is_empty() {
                            lock_buffer(&buffer).push_str(&text);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("{} reader stopped: {}", stream, e);
                        break;
                    }
                }
            }
        })
        .map_err(|e| Error::SpawnFailure(format!("Failed to start {name} reader: {e}")))
}

impl PipeBackend {
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

    fn lock_process(&self) -> MutexGuard<'_, Option<PipeProcess>> {
        self.process.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn not_running(&self) -> Error {
        if self.closed.load(Ordering::SeqCst) {
            Error::SessionClosed
        } else {
            Error::NotInitialized
        }
    }

    fn record_exit(&self, code: Option<i32>) {
        let mut exit_code = self.exit_code.lock().unwrap_or_else(|p| p.into_inner());
        if exit_code.is_none() {
            // Killed by a signal: no code, reported as unknown.
            let code = code.unwrap_or(shellbridge_core::UNKNOWN_EXIT_CODE);
            info!("Shell exited with code {}", code);
            *exit_code = Some(code);
        }
    }

    fn spawn(&self) -> Result<PipeProcess> {
        let shell = resolve_shell(self.options.shell_path.as_deref())?;
        let command = ShellCommand::interactive(&shell, self.options.username.as_deref(), false);

        info!(
            "Spawning piped shell: command='{}' args={:?}, cwd={}",
            command.program,
            command.args,
            self.options.work_dir.display()
        );

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&self.options.work_dir)
            .env_clear()
            .envs(shell_env(&self.config, command.flavor, &self.nonce))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!("Failed to spawn command '{}': {}", command.program, e);
                Error::SpawnFailure(format!("Failed to spawn command: {e}"))
            })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::SpawnFailure("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::SpawnFailure("stderr not captured".to_string()))?;

        let readers = vec![
            spawn_reader("stdout", stdout, self.buffer.clone())?,
            spawn_reader("stderr", stderr, self.buffer.clone())?,
        ];

        info!("Piped shell spawned: pid={}", child.id());
        Ok(PipeProcess {
            child,
            stdin,
            readers,
            flavor: command.flavor,
        })
    }

    fn write(&self, data: &str) -> Result<()> {
        let mut guard = self.lock_process();
        let process = guard.as_mut().ok_or_else(|| self.not_running())?;
        let stdin = process
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Backend("shell input is closed".to_string()))?;
        debug!("Writing {} bytes to shell stdin", data.len());
        stdin.write_all(data.as_bytes())?;
        stdin.flush()?;
        Ok(())
    }
}

impl TerminalBackend for PipeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Pipe
    }

    fn initialize(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        let mut guard = self.lock_process();
        if guard.is_some() {
            debug!("Pipe backend already initialized");
            return Ok(());
        }

        let mut process = self.spawn()?;
        if let Some(directive) = process.flavor.prompt_directive(&self.nonce) {
            if let Some(stdin) = process.stdin.as_mut() {
                stdin.write_all(directive.as_bytes())?;
                stdin.write_all(process.flavor.line_ending().as_bytes())?;
                stdin.flush()?;
            }
        }
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
        info!("Closing piped shell");

        // End of input asks an interactive shell to exit.
        drop(process.stdin.take());
        let grace = self.config.close_grace();
        let exited = wait_until(grace, || matches!(process.child.try_wait(), Ok(Some(_))));
        if !exited {
            warn!("Shell still running {:?} after EOF, killing", grace);
            if let Err(e) = process.child.kill() {
                debug!("Kill failed: {}", e);
            }
        }
        match process.child.wait() {
            Ok(status) => self.record_exit(status.code()),
            Err(e) => warn!("Failed to reap shell: {}", e),
        }

        for reader in process.readers.drain(..) {
            join_reader(reader, grace);
        }
        Ok(())
    }

    fn send_keys(&self, text: &str, enter: bool) -> Result<()> {
        if let Some(key) = ControlKey::parse(text) {
            // No line discipline on a pipe: nothing turns the key into a signal.
            debug!("Control key {} has no effect on the pipe backend", key);
            return if self.lock_process().is_some() {
                Ok(())
            } else {
                Err(self.not_running())
            };
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
        self.write(&data)
    }

    fn read_screen(&self) -> String {
        lock_buffer(&self.buffer).contents()
    }

    fn clear_screen(&self) -> Result<()> {
        lock_buffer(&self.buffer).clear();
        Ok(())
    }

    fn interrupt(&self) -> Result<bool> {
        if self.lock_process().is_none() {
            return Err(self.not_running());
        }
        debug!("Interrupt is not supported on the pipe backend");
        Ok(false)
    }

    fn is_alive(&self) -> bool {
        let mut guard = self.lock_process();
        let Some(process) = guard.as_mut() else {
            return false;
        };
        match process.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.record_exit(status.code());
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

impl Drop for PipeBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close pipe backend: {}", e);
        }
    }
}
