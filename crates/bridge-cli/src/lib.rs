//! JSON-lines front end for dlv-bridge.
//!
//! Every input line is one tool call; every output line is its reply. See
//! [`dispatch::Request`] and [`dispatch::Reply`] for the envelopes.

pub mod dispatch;

pub use dispatch::{serve, Dispatcher, Reply, Request};
