use std::path::PathBuf;

use thiserror::Error;

use crate::panel::PanelError;
use crate::protocol::ProtocolError;

/// Error surface for daemon startup and the serving loop.
///
/// Per-command hardware failures never appear here; the dispatcher turns
/// them into failed response envelopes.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] tinta_core::ConfigError),

    #[error("helper already running (PID {pid}, marker {marker})")]
    AlreadyRunning { pid: u32, marker: PathBuf },

    #[error("daemon socket already in use: {socket}")]
    SocketInUse { socket: PathBuf },

    #[error("hardware initialization failed: {0}")]
    HardwareInit(String),

    #[error("panel error: {0}")]
    Panel(#[from] PanelError),

    #[error("daemon protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

/// Client-side session failures. Everything except `ConnectFailed` leaves
/// the session disconnected; the caller decides whether to reconnect.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not connected to helper daemon")]
    NotConnected,

    #[error("failed to connect to helper at {socket} after {attempts} attempts: {last}")]
    ConnectFailed {
        socket: PathBuf,
        attempts: usize,
        last: String,
    },

    #[error("Connection closed by helper")]
    ConnectionClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
