//! Pid-file liveness marker used to refuse a second daemon.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, DaemonError};

/// What an existing marker file says about a previous daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerState {
    Absent,
    /// Points at a dead process, at ourselves, or is unparsable.
    Stale(Option<u32>),
    Live(u32),
}

/// Marker owned by the running daemon. Removal is explicit so that the
/// shutdown routine controls when the file disappears.
#[derive(Debug)]
pub struct LivenessMarker {
    path: PathBuf,
    pid: u32,
}

impl LivenessMarker {
    /// Claim the marker at `path` for this process.
    pub fn acquire(path: &Path) -> Result<Self, DaemonError> {
        Self::acquire_with(path, std::process::id(), process_alive)
    }

    /// Claim the marker for `pid`, using `is_alive` to judge an existing one.
    pub fn acquire_with(
        path: &Path,
        pid: u32,
        is_alive: impl Fn(u32) -> bool,
    ) -> Result<Self, DaemonError> {
        match inspect_with(path, pid, &is_alive)? {
            MarkerState::Live(other) => {
                return Err(DaemonError::AlreadyRunning {
                    pid: other,
                    marker: path.to_path_buf(),
                })
            }
            MarkerState::Stale(previous) => {
                tracing::info!(marker = %path.display(), ?previous, "removing stale liveness marker");
                remove_if_exists(path)?;
            }
            MarkerState::Absent => {}
        }

        write_atomic(path, &format!("{pid}\n"))?;
        tracing::debug!(marker = %path.display(), pid, "liveness marker written");
        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Delete the marker if it still names this process.
    pub fn remove(&self) -> Result<(), DaemonError> {
        match read_pid(&self.path)? {
            Some(Some(pid)) if pid != self.pid => {
                tracing::warn!(
                    marker = %self.path.display(),
                    owner = pid,
                    "liveness marker was replaced; leaving it"
                );
                Ok(())
            }
            Some(_) => remove_if_exists(&self.path),
            None => Ok(()),
        }
    }
}

/// Classify the marker at `path` from this process's point of view.
pub fn inspect(path: &Path) -> Result<MarkerState, DaemonError> {
    inspect_with(path, std::process::id(), &process_alive)
}

fn inspect_with(
    path: &Path,
    own_pid: u32,
    is_alive: &dyn Fn(u32) -> bool,
) -> Result<MarkerState, DaemonError> {
    Ok(match read_pid(path)? {
        None => MarkerState::Absent,
        Some(None) => MarkerState::Stale(None),
        Some(Some(pid)) if pid == own_pid || !is_alive(pid) => MarkerState::Stale(Some(pid)),
        Some(Some(pid)) => MarkerState::Live(pid),
    })
}

/// `/proc/<pid>` exists while the process (or its zombie) does.
pub fn process_alive(pid: u32) -> bool {
    pid != 0 && Path::new("/proc").join(pid.to_string()).exists()
}

// None: no file. Some(None): file without a usable pid.
fn read_pid(path: &Path) -> Result<Option<Option<u32>>, DaemonError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw.trim().parse::<u32>().ok())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

fn remove_if_exists(path: &Path) -> Result<(), DaemonError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), DaemonError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = path.with_extension("pid.tmp");
    fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))
}
