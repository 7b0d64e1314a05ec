//! Shell session orchestration.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use shellbridge_backend::{BackendKind, TerminalBackend};
use shellbridge_core::{
    CommandStatus, Error, ExecutionRecord, PromptProtocol, Result, SessionConfig, SessionId,
    SessionOptions, SessionState,
};

use crate::factory::create_backend;
use crate::output::{is_single_command, Baseline};
use crate::wait::{wait_for, CancellationToken, WaitCondition, WaitOutcome};

/// The command currently in flight.
#[derive(Debug, Clone)]
struct PendingCommand {
    ticket: u64,
    command: String,
    baseline: Baseline,
    interrupted: bool,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    pending: Option<PendingCommand>,
    next_ticket: u64,
    working_dir: Option<String>,
}

/// A long-lived shell that runs one command at a time.
///
/// All methods take `&self`, so a session can be shared between the thread
/// waiting on a command and one that interrupts or closes it.
#[derive(Debug)]
pub struct Session {
    /// Session identifier
    id: SessionId,

    /// Construction options
    options: SessionOptions,

    /// Timeouts, limits and backend preference
    config: SessionConfig,

    /// The shell backend
    backend: Box<dyn TerminalBackend>,

    /// State machine and in-flight command
    inner: Mutex<SessionInner>,

    /// Serializes `initialize` calls without blocking `state` or `close`
    init_lock: Mutex<()>,
}

impl Session {
    /// Create a session, selecting the backend for this host.
    ///
    /// The working directory must exist. Nothing is spawned until
    /// [`initialize`](Self::initialize).
    pub fn new(options: SessionOptions, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        if !options.work_dir.is_dir() {
            return Err(Error::InvalidInput(format!(
                "working directory '{}' does not exist",
                options.work_dir.display()
            )));
        }
        let backend = create_backend(&options, &config)?;
        Ok(Self::with_backend(options, config, backend))
    }

    /// Create a session around an already-built backend.
    pub fn with_backend(
        options: SessionOptions,
        config: SessionConfig,
        backend: Box<dyn TerminalBackend>,
    ) -> Self {
        let id = SessionId::new();
        info!(
            "Creating session: id={}, backend={}, work_dir={}",
            id,
            backend.kind(),
            options.work_dir.display()
        );
        Self {
            id,
            options,
            config,
            backend,
            inner: Mutex::new(SessionInner {
                state: SessionState::Uninitialized,
                pending: None,
                next_ticket: 0,
                working_dir: None,
            }),
            init_lock: Mutex::new(()),
        }
    }

    /// Get the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Options the session was created with.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Active configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Which backend drives the shell.
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Working directory reported by the most recent prompt.
    pub fn working_dir(&self) -> Option<String> {
        self.lock().working_dir.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, inner: &mut SessionInner, state: SessionState) {
        if inner.state != state {
            info!(
                "Session state changed: id={}, {} → {}",
                self.id, inner.state, state
            );
            inner.state = state;
        }
    }

    fn ensure_usable(inner: &SessionInner) -> Result<()> {
        match inner.state {
            SessionState::Uninitialized => Err(Error::NotInitialized),
            SessionState::Closed => Err(Error::SessionClosed),
            _ => Ok(()),
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.backend.is_alive() {
            Ok(())
        } else {
            Err(Error::ProcessExited(self.backend.exit_code()))
        }
    }

    fn is_closed(&self) -> bool {
        self.lock().state == SessionState::Closed
    }

    /// Settle an outstanding command whose prompt has appeared, or whose
    /// shell has exited, since it was last checked.
    fn resolve_pending(&self, inner: &mut SessionInner) {
        let Some(pending) = &inner.pending else {
            return;
        };
        let screen = self.backend.read_screen();
        if let Some(meta) = pending.baseline.completion(&screen) {
            info!("Background command finished: '{}'", pending.command);
            inner.working_dir = Some(meta.working_dir);
        } else if self.backend.is_alive() {
            return;
        }
        inner.pending = None;
        self.transition(inner, SessionState::Idle);
    }

    fn wait_condition(&self, timeout: Duration) -> WaitCondition {
        WaitCondition::new()
            .with_timeout(timeout)
            .with_poll_interval(self.config.poll_interval())
    }

    /// Spawn the shell and wait for its first prompt.
    ///
    /// A second call does nothing.
    pub fn initialize(&self) -> Result<()> {
        let _init = self.init_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match self.state() {
            SessionState::Uninitialized => {}
            SessionState::Closed => return Err(Error::SessionClosed),
            _ => {
                debug!("Session {} already initialized", self.id);
                return Ok(());
            }
        }

        self.backend.initialize()?;

        let nonce = self.backend.prompt_nonce();
        let condition = self.wait_condition(self.config.default_timeout());
        let result = wait_for(&condition, &CancellationToken::new(), || {
            if self.is_closed() {
                return Err(Error::SessionClosed);
            }
            Ok(
                PromptProtocol::trailing_prompt(&self.backend.read_screen(), nonce).is_some()
                    || !self.backend.is_alive(),
            )
        })?;
        if !result.condition_met() {
            warn!(
                "No prompt from session {} after {}ms",
                self.id, result.waited_ms
            );
        }

        let screen = self.backend.read_screen();
        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            return Err(Error::SessionClosed);
        }
        if let Some(meta) = PromptProtocol::parse_all_from(&screen, nonce).pop() {
            inner.working_dir = Some(meta.working_dir);
        }

        self.transition(&mut inner, SessionState::Idle);
        Ok(())
    }

    /// Run one command and wait for it with the configured default timeout.
    pub fn execute(&self, command: &str, enter: bool, timeout: Option<Duration>) -> Result<ExecutionRecord> {
        self.execute_with_cancel(command, enter, timeout, &CancellationToken::new())
    }

    /// Run one command, waiting until its prompt appears, the shell exits,
    /// `timeout` elapses or `token` is cancelled.
    ///
    /// A timed-out or cancelled command keeps running; the next call re-checks
    /// it and fails with [`Error::CommandStillRunning`] while it is still in
    /// flight.
    pub fn execute_with_cancel(
        &self,
        command: &str,
        enter: bool,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<ExecutionRecord> {
        let record = ExecutionRecord::new(command, enter);

        let (ticket, baseline) = {
            let mut inner = self.lock();
            Self::ensure_usable(&inner)?;

            if matches!(inner.state, SessionState::Running | SessionState::TimedOut) {
                self.resolve_pending(&mut inner);
                if let Some(pending) = &inner.pending {
                    return Err(Error::CommandStillRunning(pending.command.clone()));
                }
            }
            if inner.state != SessionState::Idle {
                return Err(Error::InvalidState {
                    expected: SessionState::Idle,
                    actual: inner.state,
                });
            }
            self.ensure_alive()?;

            if !is_single_command(command) {
                debug!("Rejecting multi-line input: {:?}", command);
                return Ok(record.finish(
                    CommandStatus::Rejected,
                    "Input contains more than one command; send them one at a time",
                ));
            }

            let baseline = Baseline::capture(&self.backend.read_screen(), self.backend.prompt_nonce());
            let ticket = inner.next_ticket;
            inner.next_ticket += 1;
            inner.pending = Some(PendingCommand {
                ticket,
                command: command.to_string(),
                baseline: baseline.clone(),
                interrupted: false,
            });
            self.transition(&mut inner, SessionState::Running);
            (ticket, baseline)
        };

        debug!("Executing in session {}: {:?}", self.id, command);
        if let Err(e) = self.backend.send_keys(command, enter) {
            let mut inner = self.lock();
            if inner.pending.as_ref().is_some_and(|p| p.ticket == ticket) {
                inner.pending = None;
                self.transition(&mut inner, SessionState::Idle);
            }
            return Err(e);
        }

        let timeout = timeout.unwrap_or_else(|| self.config.default_timeout());
        let result = wait_for(&self.wait_condition(timeout), token, || {
            let inner = self.lock();
            if inner.state == SessionState::Closed {
                return Err(Error::SessionClosed);
            }
            let taken = !inner.pending.as_ref().is_some_and(|p| p.ticket == ticket);
            drop(inner);
            Ok(taken
                || baseline.completion(&self.backend.read_screen()).is_some()
                || !self.backend.is_alive())
        })?;

        let screen = self.backend.read_screen();
        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            return Err(Error::SessionClosed);
        }
        let owned = inner.pending.as_ref().filter(|p| p.ticket == ticket).cloned();

        let record = match result.outcome {
            WaitOutcome::Met => {
                let interrupted = owned.as_ref().map_or(true, |p| p.interrupted);
                if owned.is_some() {
                    inner.pending = None;
                    if interrupted {
                        self.transition(&mut inner, SessionState::Interrupted);
                    }
                    self.transition(&mut inner, SessionState::Idle);
                }

                match baseline.completion(&screen) {
                    Some(meta) => {
                        let output = baseline.output(&screen, command, Some(&meta));
                        inner.working_dir = Some(meta.working_dir.clone());
                        let status = if interrupted {
                            CommandStatus::Interrupted
                        } else {
                            CommandStatus::Completed
                        };
                        record.finish(status, output).with_metadata(meta)
                    }
                    None if !self.backend.is_alive() => {
                        let mut record = record
                            .finish(CommandStatus::Completed, baseline.output(&screen, command, None));
                        record.exit_code = self.backend.exit_code();
                        info!(
                            "Shell in session {} exited with code {:?}",
                            self.id, record.exit_code
                        );
                        record
                    }
                    None => record.finish(
                        CommandStatus::Interrupted,
                        baseline.output(&screen, command, None),
                    ),
                }
            }
            WaitOutcome::TimedOut => {
                info!(
                    "Command timed out after {}ms in session {}: {:?}",
                    result.waited_ms, self.id, command
                );
                if owned.is_some() {
                    self.transition(&mut inner, SessionState::TimedOut);
                }
                record.finish(CommandStatus::TimedOut, baseline.output(&screen, command, None))
            }
            WaitOutcome::Cancelled => {
                info!("Wait cancelled in session {}: {:?}", self.id, command);
                record.finish(CommandStatus::Running, baseline.output(&screen, command, None))
            }
        };

        debug!(
            "Command finished: status={:?}, exit_code={:?}, {} bytes of output",
            record.status,
            record.exit_code,
            record.output.len()
        );
        Ok(record)
    }

    /// Interrupt the command in flight.
    ///
    /// Returns `true` once the shell is back at its prompt within the
    /// interrupt grace period. Returns `false` when the backend cannot deliver
    /// an interrupt or the command kept running; the session then stays busy.
    pub fn interrupt(&self) -> Result<bool> {
        let (ticket, baseline) = {
            let mut inner = self.lock();
            Self::ensure_usable(&inner)?;
            if !matches!(inner.state, SessionState::Running | SessionState::TimedOut) {
                return Err(Error::InvalidState {
                    expected: SessionState::Running,
                    actual: inner.state,
                });
            }
            let Some(pending) = inner.pending.as_mut() else {
                self.transition(&mut inner, SessionState::Idle);
                return Ok(true);
            };
            pending.interrupted = true;
            (pending.ticket, pending.baseline.clone())
        };

        let clear_mark = || {
            let mut inner = self.lock();
            if let Some(pending) = inner.pending.as_mut().filter(|p| p.ticket == ticket) {
                pending.interrupted = false;
            }
        };

        info!("Interrupting session {}", self.id);
        let delivered = match self.backend.interrupt() {
            Ok(delivered) => delivered,
            Err(e) => {
                clear_mark();
                return Err(e);
            }
        };
        if !delivered {
            info!("Backend {} cannot deliver interrupts", self.backend.kind());
            clear_mark();
            return Ok(false);
        }

        let condition = self.wait_condition(self.config.interrupt_grace());
        let result = wait_for(&condition, &CancellationToken::new(), || {
            if self.is_closed() {
                return Err(Error::SessionClosed);
            }
            Ok(baseline.completion(&self.backend.read_screen()).is_some()
                || !self.backend.is_alive())
        })?;

        if !result.condition_met() {
            warn!(
                "Session {} still busy {}ms after interrupt",
                self.id, result.waited_ms
            );
            clear_mark();
            return Ok(false);
        }

        let screen = self.backend.read_screen();
        let mut inner = self.lock();
        if inner.pending.as_ref().is_some_and(|p| p.ticket == ticket) {
            if let Some(meta) = baseline.completion(&screen) {
                inner.working_dir = Some(meta.working_dir);
            }
            inner.pending = None;
            self.transition(&mut inner, SessionState::Interrupted);
            self.transition(&mut inner, SessionState::Idle);
        }
        Ok(true)
    }

    /// Send raw input to the shell or the program it is running.
    pub fn send_keys(&self, text: &str, enter: bool) -> Result<()> {
        Self::ensure_usable(&self.lock())?;
        self.ensure_alive()?;
        self.backend.send_keys(text, enter)
    }

    /// Current screen text.
    pub fn read_screen(&self) -> Result<String> {
        Self::ensure_usable(&self.lock())?;
        Ok(self.backend.read_screen())
    }

    /// Screen text with prompt blocks removed, bounded by the history limit.
    pub fn history(&self) -> Result<String> {
        Ok(PromptProtocol::strip_prompts(&self.read_screen()?))
    }

    /// Empty the output buffer.
    pub fn clear_screen(&self) -> Result<()> {
        Self::ensure_usable(&self.lock())?;
        self.backend.clear_screen()
    }

    /// Whether a command is executing right now.
    pub fn is_running(&self) -> bool {
        match self.state() {
            SessionState::Uninitialized | SessionState::Closed => false,
            _ => self.backend.is_running(),
        }
    }

    /// Terminate the shell. Idempotent; a concurrent `execute` returns
    /// [`Error::SessionClosed`].
    pub fn close(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return Ok(());
            }
            inner.pending = None;
            self.transition(&mut inner, SessionState::Closed);
        }
        info!("Closing session {}", self.id);
        self.backend.close()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close session {}: {}", self.id, e);
        }
    }
}
