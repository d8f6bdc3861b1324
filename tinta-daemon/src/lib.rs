//! Privileged helper daemon: socket server, command dispatch, watchdog,
//! and the blocking client used by unprivileged callers.

pub mod client;
pub mod dispatch;
mod error;
pub mod liveness;
pub mod panel;
pub mod protocol;
mod runtime;
pub mod shutdown;
pub mod watchdog;

pub use client::{KeepaliveMonitor, KeepaliveStats, Session, CONNECT_BACKOFF};
pub use dispatch::{Command, Dispatcher, Hardware, SharedHardware};
pub use error::{ClientError, DaemonError};
pub use liveness::{LivenessMarker, MarkerState};
pub use panel::{ExternalPanel, PanelController, PanelError, UnconfiguredPanel};
pub use protocol::{ProtocolError, Request, Response, MAX_FRAME_BYTES};
pub use runtime::{init_tracing, run, start_blocking, Daemon, SHUTDOWN_DELAY};
pub use shutdown::{ShutdownCoordinator, ShutdownReason};
pub use watchdog::Watchdog;
