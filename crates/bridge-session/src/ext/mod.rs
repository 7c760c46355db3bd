//! Richer debugging verbs for JSON-RPC sessions.
//!
//! Each translator builds one or two backend requests from typed arguments
//! and renders the reply as text. They need a session on the JSON-RPC
//! transport and fail with [`SessionError::UnsupportedTransport`] otherwise.
//! Argument errors are reported before anything is sent.
//!
//! [`SessionError::UnsupportedTransport`]: crate::SessionError::UnsupportedTransport

mod breakpoints;
mod checkpoints;
mod execution;
mod sources;
mod stack;
mod variables;

pub use breakpoints::{clear_breakpoint, create_watchpoint, list_breakpoints, toggle_breakpoint};
pub use checkpoints::{clear_checkpoint, create_checkpoint, list_checkpoints};
pub use execution::{detach, disassemble, restart};
pub use sources::{format_sources, list_sources};
pub use stack::{stacktrace, switch_goroutine, switch_thread};
pub use variables::{
    examine_memory, format_memory_dump, list_function_args, list_local_vars, parse_address,
    set_variable,
};
