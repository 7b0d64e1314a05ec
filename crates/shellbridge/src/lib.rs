//! shellbridge driver library
//!
//! Argument parsing, line dispatch and reply schema for the `shellbridge`
//! binary. The binary itself is in main.rs.

pub mod cli;
pub mod driver;
pub mod schema;

// Re-export commonly used types
pub use cli::{BackendArg, CliArgs};
pub use driver::{dispatch, CancelSlot, Directive, Reply};
pub use schema::reply_schema;
