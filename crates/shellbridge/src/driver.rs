//! Line-oriented session driver.
//!
//! Each stdin line is either a driver directive (`!interrupt`, `!screen`,
//! `!clear`) or a command for the shell. Every line produces one [`Reply`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use schemars::JsonSchema;
use serde::Serialize;
use tracing::debug;

use shellbridge_core::{ExecutionRecord, SessionState};
use shellbridge_session::{CancellationToken, Session};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Interrupt the command in flight
    Interrupt,
    /// Report the current screen
    Screen,
    /// Clear the screen buffer
    Clear,
    /// Run a shell command
    Command(String),
}

impl Directive {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }
        let directive = match line.trim() {
            "!interrupt" => Directive::Interrupt,
            "!screen" => Directive::Screen,
            "!clear" => Directive::Clear,
            _ => Directive::Command(line.to_string()),
        };
        Some(directive)
    }
}

/// JSON line written for each input line.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    /// Result of a shell command
    Record(ExecutionRecord),
    /// Screen contents
    Screen {
        /// Screen text
        screen: String,
    },
    /// Outcome of `!interrupt`
    Interrupt {
        /// Whether the shell returned to its prompt
        delivered: bool,
        /// Session state afterwards
        state: SessionState,
    },
    /// Screen buffer cleared
    Cleared,
    /// The request failed
    Error {
        /// Error description
        message: String,
    },
}

impl Reply {
    fn error(error: impl std::fmt::Display) -> Self {
        Reply::Error {
            message: error.to_string(),
        }
    }

    /// Serialize as a single JSON line.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"failed to serialize reply: {e}"}}"#)
        })
    }
}

/// Holds the token of the command being dispatched, so a Ctrl-C handler can
/// cancel whichever wait is current.
#[derive(Debug, Clone, Default)]
pub struct CancelSlot(Arc<Mutex<CancellationToken>>);

impl CancelSlot {
    fn lock(&self) -> MutexGuard<'_, CancellationToken> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Install and return a fresh token for the next command.
    pub fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.lock() = token.clone();
        token
    }

    /// Cancel the current token.
    pub fn cancel(&self) {
        self.lock().cancel();
    }
}

/// Apply `directive` to `session`, blocking until it finishes.
///
/// `token` ends the wait of a command early; pass a fresh one per line so a
/// cancellation only affects the wait in progress when it fired.
pub fn dispatch(
    session: &Session,
    directive: Directive,
    timeout: Option<Duration>,
    token: &CancellationToken,
) -> Reply {
    debug!("Dispatching {:?}", directive);
    match directive {
        Directive::Command(command) => {
            match session.execute_with_cancel(&command, true, timeout, token) {
                Ok(record) => Reply::Record(record),
                Err(e) => Reply::error(e),
            }
        }
        Directive::Interrupt => match session.interrupt() {
            Ok(delivered) => Reply::Interrupt {
                delivered,
                state: session.state(),
            },
            Err(e) => Reply::error(e),
        },
        Directive::Screen => match session.read_screen() {
            Ok(screen) => Reply::Screen { screen },
            Err(e) => Reply::error(e),
        },
        Directive::Clear => match session.clear_screen() {
            Ok(()) => Reply::Cleared,
            Err(e) => Reply::error(e),
        },
    }
}
