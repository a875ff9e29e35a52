//! Drives the `claude` CLI as a one-shot subprocess and exposes it to the
//! engine as an [`flow_core::dispatch::AgentDispatcher`].

mod error;
mod process;
mod snapshot;
mod types;

pub use error::AgentError;
pub use process::{ClaudeCliDispatcher, DispatcherOptions, DEFAULT_PROGRAM};
pub use snapshot::Snapshot;
pub use types::CliResult;

pub type Result<T> = std::result::Result<T, AgentError>;
