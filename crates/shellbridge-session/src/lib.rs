//! # shellbridge-session
//!
//! Command execution on top of a shell backend.
//!
//! This crate provides:
//! - Backend selection for the host platform
//! - The session state machine (initialize, execute, interrupt, close)
//! - Completion detection against the prompt seen before each command
//! - Cancellable polling waits
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on shellbridge-core
//! and shellbridge-backend.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod factory;
pub mod output;
pub mod session;
pub mod wait;

// Re-export commonly used types
pub use factory::{build_backend, create_backend, select_backend_kind};
pub use output::{clean_output, is_single_command, Baseline};
pub use session::Session;
pub use wait::{wait_for, CancellationToken, WaitCondition, WaitOutcome, WaitResult};
