//! # shellbridge-backend
//!
//! Shell backends for shellbridge.
//!
//! This crate provides:
//! - The [`TerminalBackend`] trait shared by all variants
//! - A pseudo-terminal backend ([`PtyBackend`])
//! - A tmux backend ([`TmuxBackend`])
//! - A plain pipe backend ([`PipeBackend`])
//! - The bounded output buffer and ANSI stripping the readers use
//! - Shell resolution and environment sanitation
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on shellbridge-core
//! and knows nothing about command sequencing or session state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ansi;
pub mod backend;
pub mod buffer;
pub mod env;
pub mod pipe;
pub mod pty;
pub mod shell;
pub mod tmux;

// Re-export commonly used types
pub use ansi::AnsiStripper;
pub use backend::{BackendKind, TerminalBackend};
pub use buffer::{OutputBuffer, SharedBuffer};
pub use pipe::PipeBackend;
pub use pty::PtyBackend;
pub use shell::{find_in_path, resolve_shell, ShellCommand, ShellFlavor};
pub use tmux::{tmux_available, TmuxBackend};
