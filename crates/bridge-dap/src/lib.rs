//! Debug Adapter Protocol client for a `dlv dap` backend.
//!
//! Requests and unsolicited events share one Content-Length framed stream.
//! [`DapClient`] stamps every request with an ascending sequence number and a
//! background listener routes each response to the waiter whose request it
//! answers.

mod client;
pub mod codec;
mod error;
pub mod protocol;

pub use client::{DapClient, DapClientConfig, ExecutionStatus};
pub use error::{DapError, Result};

// The mock backend is only needed for tests and downstream integration suites.
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
