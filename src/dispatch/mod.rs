//! Command dispatch
//!
//! Turns matched workflows into command runs on the async runtime, through
//! a pluggable executor per command kind.

mod dispatcher;
mod executor;
mod system;

pub use dispatcher::{DispatchRequest, Dispatcher, RunReport};
pub use executor::{execute, CommandExecutor, DispatchError, ExecutorError};
pub use system::SystemExecutor;
