//! Byte-wide I/O port access.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Byte-wide access to legacy I/O ports.
///
/// The register engine only ever talks to hardware through this trait, so
/// the handshake can be driven against [`crate::sim::SimulatedEc`] in tests.
pub trait PortIo: Send {
    fn inb(&mut self, port: u16) -> io::Result<u8>;
    fn outb(&mut self, port: u16, value: u8) -> io::Result<()>;
}

/// `/dev/port` backend: file offset `n` is I/O port `n`.
///
/// Opening requires `CAP_SYS_RAWIO` and is refused by the kernel under
/// Secure Boot lockdown.
#[derive(Debug)]
pub struct DevPort {
    file: File,
    path: PathBuf,
}

impl DevPort {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        tracing::info!(path = %path.display(), "EC I/O port access granted");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PortIo for DevPort {
    fn inb(&mut self, port: u16) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.file.read_exact_at(&mut buf, u64::from(port))?;
        Ok(buf[0])
    }

    fn outb(&mut self, port: u16, value: u8) -> io::Result<()> {
        self.file.write_all_at(&[value], u64::from(port))
    }
}
