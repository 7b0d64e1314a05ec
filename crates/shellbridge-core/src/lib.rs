//! # shellbridge-core
//!
//! Core types for shellbridge.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other shellbridge crates. It provides:
//!
//! - The prompt protocol that makes command boundaries machine-detectable
//! - Session state, options and command execution records
//! - Control keys for `send_keys`
//! - Session configuration
//! - Platform detection
//! - Error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other shellbridge crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod key;
pub mod platform;
pub mod prompt;
pub mod session;

// Re-export commonly used types
pub use config::{BackendPreference, SessionConfig};
pub use error::{Error, Result};
pub use key::ControlKey;
pub use platform::Platform;
pub use prompt::{
    PromptIdentity, PromptMetadata, PromptProtocol, PROMPT_BEGIN, PROMPT_END, UNKNOWN_EXIT_CODE,
};
pub use session::{CommandStatus, ExecutionRecord, SessionId, SessionOptions, SessionState};
