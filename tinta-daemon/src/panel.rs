//! E-Ink panel collaborator.
//!
//! The panel's timing-controller protocol lives outside this daemon. The
//! daemon only needs the four mode operations, so it drives an external
//! helper program and treats its exit status as the result.

use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{ChildStderr, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

const WAIT_POLL: Duration = Duration::from_millis(20);
/// Tail of the helper's stderr carried in [`PanelError::Failed`].
const STDERR_TAIL: usize = 4096;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("E-Ink panel controller is not configured")]
    NotConfigured,

    #[error("panel helper not found or not executable: {0}")]
    NotFound(PathBuf),

    #[error("failed to run panel helper {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("panel {operation} failed ({status}): {stderr}")]
    Failed {
        operation: &'static str,
        status: ExitStatus,
        stderr: String,
    },

    #[error("panel {operation} timed out after {}s", .after.as_secs())]
    TimedOut {
        operation: &'static str,
        after: Duration,
    },
}

/// Display-mode operations the daemon exposes over the socket.
pub trait PanelController: Send {
    fn connect(&mut self) -> Result<(), PanelError>;
    fn disconnect(&mut self);
    fn switch_to_eink(&mut self) -> Result<(), PanelError>;
    fn switch_to_oled(&mut self) -> Result<(), PanelError>;
    fn refresh_full(&mut self) -> Result<(), PanelError>;
    fn refresh_quick(&mut self) -> Result<(), PanelError>;
}

// ---------------------------------------------------------------------------
// External helper program
// ---------------------------------------------------------------------------

/// Runs `<program> <args...> <operation>` for each mode change.
#[derive(Debug, Clone)]
pub struct ExternalPanel {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    resolved: Option<PathBuf>,
}

impl ExternalPanel {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            resolved: None,
        }
    }

    fn run(&mut self, operation: &'static str) -> Result<(), PanelError> {
        let program = match &self.resolved {
            Some(path) => path.clone(),
            None => {
                let path = resolve_program(&self.program)?;
                self.resolved = Some(path.clone());
                path
            }
        };

        tracing::debug!(program = %program.display(), operation, "running panel helper");
        let mut child = Command::new(&program)
            .args(&self.args)
            .arg(operation)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PanelError::Spawn {
                program: program.clone(),
                source,
            })?;
        let stderr = child.stderr.take().map(drain_stderr);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::error!(operation, "panel helper timed out; killed");
                    return Err(PanelError::TimedOut {
                        operation,
                        after: self.timeout,
                    });
                }
                Ok(None) => std::thread::sleep(WAIT_POLL),
                Err(source) => {
                    return Err(PanelError::Spawn {
                        program: program.clone(),
                        source,
                    })
                }
            }
        };

        let stderr = stderr
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        if status.success() {
            return Ok(());
        }
        Err(PanelError::Failed {
            operation,
            status,
            stderr: stderr_tail(&stderr),
        })
    }
}

/// Keeps the pipe empty while the helper runs so a chatty helper never
/// blocks on a full pipe.
fn drain_stderr(mut pipe: ChildStderr) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    let mut start = text.len().saturating_sub(STDERR_TAIL);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

impl PanelController for ExternalPanel {
    fn connect(&mut self) -> Result<(), PanelError> {
        let path = resolve_program(&self.program)?;
        tracing::info!(program = %path.display(), "E-Ink panel helper ready");
        self.resolved = Some(path);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.resolved.take().is_some() {
            tracing::info!("E-Ink panel controller disconnected");
        }
    }

    fn switch_to_eink(&mut self) -> Result<(), PanelError> {
        self.run("eink")
    }

    fn switch_to_oled(&mut self) -> Result<(), PanelError> {
        self.run("oled")
    }

    fn refresh_full(&mut self) -> Result<(), PanelError> {
        self.run("refresh-full")
    }

    fn refresh_quick(&mut self) -> Result<(), PanelError> {
        self.run("refresh-quick")
    }
}

/// A bare name is searched on `PATH`; anything with a separator must exist.
fn resolve_program(program: &Path) -> Result<PathBuf, PanelError> {
    if program.components().count() > 1 || program.is_absolute() {
        return if is_executable(program) {
            Ok(program.to_path_buf())
        } else {
            Err(PanelError::NotFound(program.to_path_buf()))
        };
    }
    std::env::var_os("PATH")
        .iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| PanelError::NotFound(program.to_path_buf()))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// No panel configured
// ---------------------------------------------------------------------------

/// Stand-in when no helper is configured: EC commands keep working,
/// display-mode commands fail cleanly.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredPanel;

impl PanelController for UnconfiguredPanel {
    fn connect(&mut self) -> Result<(), PanelError> {
        tracing::warn!("no panel helper configured; display-mode commands will fail");
        Ok(())
    }

    fn disconnect(&mut self) {}

    fn switch_to_eink(&mut self) -> Result<(), PanelError> {
        Err(PanelError::NotConfigured)
    }

    fn switch_to_oled(&mut self) -> Result<(), PanelError> {
        Err(PanelError::NotConfigured)
    }

    fn refresh_full(&mut self) -> Result<(), PanelError> {
        Err(PanelError::NotConfigured)
    }

    fn refresh_quick(&mut self) -> Result<(), PanelError> {
        Err(PanelError::NotConfigured)
    }
}
