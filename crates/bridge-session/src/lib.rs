//! Debugging sessions over a Delve backend.
//!
//! A [`Session`] owns one transport (JSON-RPC or DAP, see [`Transport`]) and
//! the backend process behind it, and tracks the debuggee's state. The
//! [`SessionManager`] creates and tracks sessions; [`ext`] holds the richer
//! verbs that only the JSON-RPC backend supports.

mod error;
pub mod ext;
pub mod format;
mod launcher;
mod manager;
mod session;
mod transport;

pub use error::{SessionError, SessionResult};
pub use launcher::{BackendCommand, BackendLauncher, LaunchedBackend};
pub use manager::SessionManager;
pub use session::{LaunchMode, Session, SessionInfo, SessionState};
pub use transport::{LaunchSpec, ProtocolClient, Transport};
