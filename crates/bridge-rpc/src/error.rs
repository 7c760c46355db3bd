use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("not connected")]
    NotConnected,

    #[error("client is closed")]
    Closed,

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to {addr}")]
    ConnectTimeout { addr: String },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(String),

    #[error("error from Delve: {0}")]
    Backend(String),

    #[error("response ID {actual} does not match request ID {expected}")]
    IdMismatch { expected: u64, actual: u64 },

    #[error("connection lost after reconnect: {0}")]
    ConnectionLost(#[source] io::Error),

    #[error("rpc protocol error: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Json(sanitize_json_error_message(&err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

/// `serde_json` diagnostics can echo scalar values from the payload (evaluated
/// expressions, program arguments). Redact quoted segments before surfacing.
pub(crate) fn sanitize_json_error_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(start) = rest.find('"') {
        out.push_str(&rest[..start + 1]);
        rest = &rest[start + 1..];

        let Some(end) = rest.find('"') else {
            out.push_str(rest);
            return out;
        };
        out.push_str("<redacted>\"");
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}
