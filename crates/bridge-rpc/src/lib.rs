//! Line-delimited JSON-RPC client for the Delve headless API.
//!
//! Requests are written as `{"method", "params": [..], "id"}` followed by a
//! newline and answered by exactly one reply line. See [`RpcClient`] for the
//! connection and retry model.

pub mod api;
mod client;
mod error;
mod params;

pub use client::{Completion, RpcClient, RpcClientConfig};
pub use error::{Result, RpcError};
pub use params::normalize_params;

// The mock backend is only needed for tests and downstream integration suites.
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
