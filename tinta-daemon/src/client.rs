//! Blocking client for the helper socket.
//!
//! A [`Session`] owns at most one connection. Exchanges are serialized by a
//! mutex so a keepalive thread and a foreground command never interleave
//! frames. Any transport or decode error drops the connection; callers
//! reconnect explicitly.

use std::io::Write;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::ClientError;
use crate::protocol::{encode_frame, read_frame, ProtocolError, Request, Response};

/// Sleep after each failed connect attempt.
pub const CONNECT_BACKOFF: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_millis(1000),
    Duration::from_millis(2000),
];

#[derive(Debug)]
pub struct Session {
    socket_path: PathBuf,
    stream: Mutex<Option<UnixStream>>,
    connected: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl Session {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Connect, retrying with [`CONNECT_BACKOFF`]. `timeout` becomes the
    /// socket read/write timeout for later exchanges.
    pub fn connect(&self, timeout: Duration) -> Result<(), ClientError> {
        self.connect_with_backoff(timeout, &CONNECT_BACKOFF)
    }

    /// One attempt per `backoff` entry, sleeping that entry after a failure.
    pub fn connect_with_backoff(
        &self,
        timeout: Duration,
        backoff: &[Duration],
    ) -> Result<(), ClientError> {
        let mut slot = self.lock_stream();
        let mut last = String::from("no connection attempts made");

        for (attempt, pause) in backoff.iter().enumerate() {
            if let Some(stale) = slot.take() {
                let _ = stale.shutdown(Shutdown::Both);
            }
            self.connected.store(false, Ordering::SeqCst);

            match open_stream(&self.socket_path, timeout) {
                Ok(stream) => {
                    *slot = Some(stream);
                    self.connected.store(true, Ordering::SeqCst);
                    self.set_last_error(None);
                    tracing::info!(socket = %self.socket_path.display(), "connected to helper");
                    return Ok(());
                }
                Err(err) => {
                    last = err.to_string();
                    tracing::warn!(
                        attempt = attempt + 1,
                        of = backoff.len(),
                        error = %err,
                        "helper connect failed",
                    );
                    self.set_last_error(Some(format!(
                        "Connection attempt {}/{} failed: {err}",
                        attempt + 1,
                        backoff.len()
                    )));
                    if !pause.is_zero() {
                        std::thread::sleep(*pause);
                    }
                }
            }
        }

        Err(ClientError::ConnectFailed {
            socket: self.socket_path.clone(),
            attempts: backoff.len(),
            last,
        })
    }

    /// One request/response exchange. Never retried.
    pub fn send_command(
        &self,
        command: &str,
        params: Map<String, Value>,
    ) -> Result<Response, ClientError> {
        let mut slot = self.lock_stream();
        let stream = match slot.as_mut() {
            Some(stream) if self.connected.load(Ordering::SeqCst) => stream,
            _ => return Err(ClientError::NotConnected),
        };

        let request = Request {
            command: command.to_string(),
            params,
        };
        // Refused before any byte is written; the stream stays aligned.
        let frame = match encode_frame(&request) {
            Ok(frame) => frame,
            Err(err) => {
                self.set_last_error(Some(err.to_string()));
                return Err(err.into());
            }
        };

        match exchange(stream, &frame) {
            Ok(response) => Ok(response),
            Err(err) => {
                self.fail(&mut slot, &err.to_string());
                Err(err)
            }
        }
    }

    /// Best-effort `shutdown` of the daemon, then close. Never fails.
    pub fn disconnect(&self) {
        if self.is_connected() {
            match self.send_command("shutdown", Map::new()) {
                Ok(response) => tracing::debug!(reply = response.summary(), "helper acknowledged shutdown"),
                Err(err) => tracing::debug!(error = %err, "shutdown request failed during disconnect"),
            }
        }
        self.close();
    }

    /// Drop the connection without asking the daemon to stop.
    pub fn close(&self) {
        let mut slot = self.lock_stream();
        if let Some(stream) = slot.take() {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::debug!("helper connection closed");
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    // -- command helpers ----------------------------------------------------

    pub fn keepalive(&self) -> Result<Response, ClientError> {
        self.send_command("keepalive", Map::new())
    }

    pub fn status(&self) -> Result<Response, ClientError> {
        self.send_command("get-status", Map::new())
    }

    pub fn enable_eink(&self) -> Result<Response, ClientError> {
        self.send_command("enable-eink", Map::new())
    }

    pub fn enable_oled(&self) -> Result<Response, ClientError> {
        self.send_command("enable-oled", Map::new())
    }

    pub fn refresh_eink(&self, quick: bool) -> Result<Response, ClientError> {
        let command = if quick { "refresh-eink-quick" } else { "refresh-eink" };
        self.send_command(command, Map::new())
    }

    pub fn enable_frontlight(&self, level: Option<u8>) -> Result<Response, ClientError> {
        let mut params = Map::new();
        if let Some(level) = level {
            params.insert("level".into(), level.into());
        }
        self.send_command("enable-frontlight", params)
    }

    pub fn disable_frontlight(&self) -> Result<Response, ClientError> {
        self.send_command("disable-frontlight", Map::new())
    }

    pub fn set_brightness(&self, level: u8) -> Result<Response, ClientError> {
        let mut params = Map::new();
        params.insert("level".into(), level.into());
        self.send_command("set-brightness", params)
    }

    // -- internals ----------------------------------------------------------

    fn fail(&self, slot: &mut MutexGuard<'_, Option<UnixStream>>, error: &str) {
        if let Some(stream) = slot.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.connected.store(false, Ordering::SeqCst);
        self.set_last_error(Some(error.to_string()));
        tracing::warn!(error, "helper session lost");
    }

    fn set_last_error(&self, error: Option<String>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = error;
    }

    fn lock_stream(&self) -> MutexGuard<'_, Option<UnixStream>> {
        self.stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn open_stream(path: &Path, timeout: Duration) -> std::io::Result<UnixStream> {
    let stream = UnixStream::connect(path)?;
    let timeout = (!timeout.is_zero()).then_some(timeout);
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;
    Ok(stream)
}

fn exchange(stream: &mut UnixStream, frame: &[u8]) -> Result<Response, ClientError> {
    stream.write_all(frame).map_err(ProtocolError::Io)?;
    stream.flush().map_err(ProtocolError::Io)?;
    read_frame(stream)?.ok_or(ClientError::ConnectionClosed)
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

/// Counters exposed by a running [`KeepaliveMonitor`].
#[derive(Debug, Default)]
pub struct KeepaliveStats {
    pub sent: AtomicU64,
    pub failed: AtomicU64,
    pub reconnects: AtomicU64,
}

/// Background thread that keeps the daemon's watchdog fed.
#[derive(Debug)]
pub struct KeepaliveMonitor {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<KeepaliveStats>,
}

impl KeepaliveMonitor {
    /// Send `keepalive` every `interval`. A missing connection or failed
    /// keepalive triggers a reconnect with `connect_timeout`.
    pub fn spawn(session: Arc<Session>, interval: Duration, connect_timeout: Duration) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let stats = Arc::new(KeepaliveStats::default());
        let thread_stats = stats.clone();

        let handle = std::thread::Builder::new()
            .name("tinta-keepalive".into())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
                tick(&session, connect_timeout, &thread_stats);
            })
            .map_err(|err| tracing::error!(error = %err, "failed to start keepalive thread"))
            .ok();

        Self {
            stop: Some(stop),
            handle,
            stats,
        }
    }

    pub fn stats(&self) -> &KeepaliveStats {
        &self.stats
    }

    /// Stop the thread and wait for it. Waits out an in-flight keepalive.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for KeepaliveMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn tick(session: &Session, connect_timeout: Duration, stats: &KeepaliveStats) {
    if !session.is_connected() {
        tracing::warn!("helper connection lost; reconnecting");
        stats.reconnects.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = session.connect(connect_timeout) {
            tracing::error!(error = %err, "reconnect failed");
        }
        return;
    }

    stats.sent.fetch_add(1, Ordering::Relaxed);
    match session.keepalive() {
        Ok(response) if response.success => tracing::trace!("keepalive ok"),
        Ok(response) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = response.summary(), "keepalive rejected");
        }
        Err(err) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "keepalive failed");
        }
    }
}
