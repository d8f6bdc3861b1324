//! Secure Boot detection.
//!
//! Under Secure Boot the kernel runs in lockdown mode and refuses raw port
//! access, so the daemon checks this first and reports it explicitly rather
//! than surfacing a bare permission error.

use std::io;
use std::path::{Path, PathBuf};

/// Source of the platform's Secure Boot state.
pub trait SecureBootProbe {
    fn secure_boot_enabled(&self) -> io::Result<bool>;
}

/// Reads the `SecureBoot` EFI global variable through efivarfs.
///
/// efivarfs prefixes every variable with a 4-byte attribute word; the state
/// is the following byte (`1` = enabled). A missing variable means the
/// machine did not boot through UEFI Secure Boot at all.
#[derive(Debug, Clone)]
pub struct EfiVarSecureBoot {
    path: PathBuf,
}

impl EfiVarSecureBoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecureBootProbe for EfiVarSecureBoot {
    fn secure_boot_enabled(&self) -> io::Result<bool> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        match bytes.get(4) {
            Some(value) => Ok(*value == 1),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{}: expected at least 5 bytes, found {}",
                    self.path.display(),
                    bytes.len()
                ),
            )),
        }
    }
}

/// Fixed answer; used with the simulator and in tests.
#[derive(Debug, Clone, Copy)]
pub struct KnownSecureBoot(pub bool);

impl SecureBootProbe for KnownSecureBoot {
    fn secure_boot_enabled(&self) -> io::Result<bool> {
        Ok(self.0)
    }
}
