use std::io;

use thiserror::Error;

use crate::session::SessionState;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("rpc: {0}")]
    Rpc(#[from] bridge_rpc::RpcError),

    #[error("dap: {0}")]
    Dap(#[from] bridge_dap::DapError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot {operation}: program is not paused")]
    NotPaused { operation: &'static str },

    #[error("cannot {operation}: session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("session {0} not found")]
    NotFound(String),

    #[error("{operation} requires a JSON-RPC backend session")]
    UnsupportedTransport { operation: &'static str },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("backend at {addr} did not become ready: {reason}")]
    BackendStartup { addr: String, reason: String },

    #[error("failed to {operation}: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: Box<SessionError>,
    },
}

impl SessionError {
    /// Wraps `self` with the name of the operation that failed.
    pub fn during(self, operation: &'static str) -> Self {
        match self {
            // Argument and state errors already name their operation.
            err @ (SessionError::InvalidArgument(_)
            | SessionError::NotPaused { .. }
            | SessionError::InvalidState { .. }
            | SessionError::UnsupportedTransport { .. }
            | SessionError::Operation { .. }) => err,
            err => SessionError::Operation {
                operation,
                source: Box::new(err),
            },
        }
    }
}

/// Extension to tag a fallible backend call with its operation name.
pub(crate) trait ResultExt<T> {
    fn during(self, operation: &'static str) -> SessionResult<T>;
}

impl<T, E: Into<SessionError>> ResultExt<T> for Result<T, E> {
    fn during(self, operation: &'static str) -> SessionResult<T> {
        self.map_err(|err| err.into().during(operation))
    }
}
