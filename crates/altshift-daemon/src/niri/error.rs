//! niri IPC failures

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NiriError {
    /// Not running under niri; focus falls back to the default profile
    #[error("NIRI_SOCKET is not set, focused-window tracking unavailable")]
    SocketNotSet,

    #[error("no niri socket at {path}")]
    SocketNotFound { path: PathBuf },

    #[error("cannot connect to niri at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writing to niri failed: {0}")]
    SendFailed(#[source] std::io::Error),

    #[error("reading from niri failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    #[error("cannot encode niri request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    #[error("cannot decode niri reply: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    /// niri answered with `Err(message)`
    #[error("niri rejected the request: {message}")]
    Rejected { message: String },

    #[error("niri sent an unexpected reply to {request}")]
    UnexpectedResponse { request: &'static str },

    #[error("niri closed the connection")]
    ConnectionClosed,

    #[error("gave up connecting to niri after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },
}
