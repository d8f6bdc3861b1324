use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};

use tinta_core::DaemonConfig;

use crate::dispatch::{lock_hardware, Command, Dispatcher, Hardware, SharedHardware};
use crate::error::{io_err, DaemonError};
use crate::liveness::LivenessMarker;
use crate::protocol::{read_frame_async, write_frame_async, ProtocolError, Request, Response};
use crate::shutdown::{ShutdownCoordinator, ShutdownReason};
use crate::watchdog::Watchdog;

/// How long one `accept` waits before the loop re-checks the running flag.
const ACCEPT_POLL: Duration = Duration::from_secs(1);

/// Delay between answering `shutdown` and tearing down, so the response
/// reaches the client first.
pub const SHUTDOWN_DELAY: Duration = Duration::from_millis(100);

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(config: DaemonConfig) -> Result<(), DaemonError> {
    init_tracing(&config.log_level);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Run the daemon against real hardware until shutdown.
pub async fn run(config: DaemonConfig) -> Result<(), DaemonError> {
    let daemon = Daemon::start(config, |config| Hardware::from_config(&config)).await?;
    daemon.install_signal_handlers()?;
    daemon.serve().await
}

/// The daemon's whole state. Owned by [`Daemon::serve`]; everything the
/// per-client tasks need is shared out of it by `Arc`.
pub struct Daemon {
    config: DaemonConfig,
    hardware: SharedHardware,
    dispatcher: Dispatcher,
    watchdog: Watchdog,
    shutdown: Arc<ShutdownCoordinator>,
    listener: UnixListener,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("socket", &self.config.socket_path)
            .field("watchdog", &self.watchdog)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Claim the liveness marker, bring up hardware via `build`, and bind
    /// the socket. Nothing is served until [`Daemon::serve`].
    ///
    /// `build` runs on a blocking thread; EC initialization polls the port.
    pub async fn start<F>(config: DaemonConfig, build: F) -> Result<Self, DaemonError>
    where
        F: FnOnce(DaemonConfig) -> Hardware + Send + 'static,
    {
        config.validate()?;
        let marker = Arc::new(LivenessMarker::acquire(&config.pid_file)?);
        tracing::info!(
            pid = marker.pid(),
            marker = %marker.path().display(),
            "tinta helper daemon starting",
        );

        match Self::bring_up(config, build, marker.clone()).await {
            Ok(daemon) => Ok(daemon),
            Err(err) => {
                if let Err(cleanup) = marker.remove() {
                    tracing::warn!(error = %cleanup, "failed to remove liveness marker");
                }
                Err(err)
            }
        }
    }

    async fn bring_up<F>(
        config: DaemonConfig,
        build: F,
        marker: Arc<LivenessMarker>,
    ) -> Result<Self, DaemonError>
    where
        F: FnOnce(DaemonConfig) -> Hardware + Send + 'static,
    {
        let build_config = config.clone();
        let mut hardware = tokio::task::spawn_blocking(move || build(build_config))
            .await
            .map_err(|e| DaemonError::Join {
                task: "hardware init",
                message: e.to_string(),
            })?;

        hardware
            .panel
            .connect()
            .map_err(|e| DaemonError::HardwareInit(format!("E-Ink panel: {e}")))?;
        let hardware = hardware.shared();

        let socket = config.socket_path.clone();
        let listener = match bind_socket(&socket) {
            Ok(listener) => listener,
            Err(err) => {
                lock_hardware(&hardware).panel.disconnect();
                return Err(err);
            }
        };
        tracing::info!(socket = %socket.display(), "listening");

        let shutdown = Arc::new(ShutdownCoordinator::new());
        {
            let hardware = hardware.clone();
            shutdown.register("panel", move || lock_hardware(&hardware).panel.disconnect());
        }
        shutdown.register("socket", move || {
            if let Err(err) = remove_socket(&socket) {
                tracing::warn!(error = %err, "failed to remove daemon socket");
            }
        });
        shutdown.register("liveness marker", move || {
            if let Err(err) = marker.remove() {
                tracing::warn!(error = %err, "failed to remove liveness marker");
            }
        });

        let watchdog = {
            let shutdown = shutdown.clone();
            Watchdog::spawn(config.watchdog_timeout(), move || {
                drop(shutdown.trigger_blocking(ShutdownReason::Watchdog));
            })
        };
        shutdown.attach_watchdog(watchdog.clone());

        let dispatcher = Dispatcher::new(hardware.clone(), watchdog.clone());
        Ok(Self {
            config,
            hardware,
            dispatcher,
            watchdog,
            shutdown,
            listener,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn hardware(&self) -> &SharedHardware {
        &self.hardware
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Handle for triggering or awaiting shutdown from outside the daemon.
    pub fn shutdown_handle(&self) -> Arc<ShutdownCoordinator> {
        self.shutdown.clone()
    }

    /// Route SIGINT and SIGTERM into the shutdown routine.
    pub fn install_signal_handlers(&self) -> Result<(), DaemonError> {
        let mut terminate =
            signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
        let mut interrupt =
            signal(SignalKind::interrupt()).map_err(|e| io_err("SIGINT handler", e))?;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let name = tokio::select! {
                _ = terminate.recv() => "SIGTERM",
                _ = interrupt.recv() => "SIGINT",
                _ = shutdown.wait() => return,
            };
            let _ = shutdown.trigger_blocking(ShutdownReason::Signal(name)).await;
        });
        Ok(())
    }

    /// Serve clients until the shutdown routine has completed.
    pub async fn serve(self) -> Result<(), DaemonError> {
        let result = self.accept_loop().await;
        if let Err(err) = &result {
            tracing::error!(error = %err, "accept loop failed");
            let _ = self.shutdown.trigger_blocking(ShutdownReason::AcceptLoop).await;
        }
        self.shutdown.wait().await;
        tracing::info!(
            reason = %self.shutdown.reason().map(|r| r.to_string()).unwrap_or_default(),
            "daemon stopped",
        );
        result
    }

    async fn accept_loop(&self) -> Result<(), DaemonError> {
        while self.shutdown.is_running() {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                accepted = tokio::time::timeout(ACCEPT_POLL, self.listener.accept()) => {
                    let Ok(accepted) = accepted else { continue };
                    let (stream, _) = accepted.map_err(|e| io_err(&self.config.socket_path, e))?;
                    let dispatcher = self.dispatcher.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_client(stream, dispatcher, shutdown).await {
                            tracing::warn!(error = %err, "client session ended with error");
                        }
                    });
                }
            }
        }
        Ok(())
    }
}

async fn handle_client(
    stream: UnixStream,
    dispatcher: Dispatcher,
    shutdown: Arc<ShutdownCoordinator>,
) -> Result<(), DaemonError> {
    let (mut reader, mut writer) = stream.into_split();
    tracing::debug!("client connected");

    while shutdown.is_running() {
        let request: Request = match read_frame_async(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(err @ (ProtocolError::Decode(_) | ProtocolError::InvalidUtf8(_))) => {
                tracing::warn!(error = %err, "undecodable request");
                write_frame_async(&mut writer, &Response::failure(format!("invalid request: {err}")))
                    .await?;
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let shutdown_requested = Command::parse(&request.command) == Some(Command::Shutdown);
        let worker = dispatcher.clone();
        let response = tokio::task::spawn_blocking(move || worker.dispatch(&request))
            .await
            .map_err(|e| DaemonError::Join {
                task: "dispatch",
                message: e.to_string(),
            })?;
        write_frame_async(&mut writer, &response).await?;

        if shutdown_requested {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(SHUTDOWN_DELAY).await;
                let _ = shutdown.trigger_blocking(ShutdownReason::Command).await;
            });
            break;
        }
    }

    tracing::debug!("client disconnected");
    Ok(())
}

fn bind_socket(socket: &Path) -> Result<UnixListener, DaemonError> {
    if let Some(parent) = socket.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }
    prepare_socket_for_bind(socket)?;
    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    set_socket_permissions(socket)?;
    Ok(listener)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::SocketInUse {
                socket: socket.to_path_buf(),
            });
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    remove_socket(socket)
}

fn remove_socket(socket: &Path) -> Result<(), DaemonError> {
    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

/// World-writable so the unprivileged front-end can connect to a root daemon.
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o666)).map_err(|e| io_err(path, e))
}

/// Install the fmt subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
