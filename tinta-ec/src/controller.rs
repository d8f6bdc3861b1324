//! Register protocol engine.
//!
//! [`EcController`] owns the port handle for the life of the daemon. All
//! methods take `&mut self`: a write is four dependent transfers, and two
//! interleaved sequences would corrupt each other, so callers serialize
//! access by holding the controller behind one lock.

use std::io;
use std::thread::sleep;
use std::time::{Duration, Instant};

use tinta_core::{BrightnessLevel, FrontlightState};

use crate::error::{AccessError, EcError, TimeoutStage};
use crate::port::PortIo;
use crate::registers::{
    EC_CMD_READ, EC_CMD_WRITE, EC_DATA_PORT, EC_SC_PORT, EC_STAT_IBF, EC_STAT_OBF,
    POWER_DISABLE, POWER_ENABLE, REG_BRIGHTNESS, REG_POWER,
};
use crate::secure_boot::SecureBootProbe;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Handshake timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcTiming {
    /// Deadline for one buffer gate.
    pub buffer_timeout: Duration,
    /// Sleep between status polls.
    pub poll_interval: Duration,
    /// Fixed pause between a write and its verification read. The EC needs
    /// this to latch the new value; it is not a retry.
    pub settle_delay: Duration,
}

impl Default for EcTiming {
    fn default() -> Self {
        Self {
            buffer_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_micros(50),
            settle_delay: Duration::from_millis(100),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of a write-and-verify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verified {
    /// Whether the readback was one of the accepted values.
    pub success: bool,
    pub readback: u8,
}

impl Verified {
    pub fn readback_hex(&self) -> String {
        format!("0x{:02x}", self.readback)
    }
}

/// Access state fixed at initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessStatus {
    pub available: bool,
    pub secure_boot_enabled: bool,
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// The buffer handshake over a borrowed port. Separate from the controller
/// so the startup probe can run before access is declared available.
struct Handshake<'a> {
    port: &'a mut dyn PortIo,
    timing: EcTiming,
}

impl Handshake<'_> {
    fn wait_for(&mut self, stage: TimeoutStage) -> Result<(), EcError> {
        let deadline = Instant::now() + self.timing.buffer_timeout;
        loop {
            let status = self.port.inb(EC_SC_PORT)?;
            let ready = match stage {
                TimeoutStage::InputBuffer => status & EC_STAT_IBF == 0,
                TimeoutStage::OutputBuffer => status & EC_STAT_OBF != 0,
            };
            if ready {
                return Ok(());
            }
            if Instant::now() >= deadline {
                tracing::warn!(%stage, status = format_args!("0x{status:02x}"), "EC handshake timed out");
                return Err(EcError::Timeout { stage });
            }
            sleep(self.timing.poll_interval);
        }
    }

    fn wait_ibf_clear(&mut self) -> Result<(), EcError> {
        self.wait_for(TimeoutStage::InputBuffer)
    }

    fn wait_obf_set(&mut self) -> Result<(), EcError> {
        self.wait_for(TimeoutStage::OutputBuffer)
    }

    fn read_byte(&mut self, address: u8) -> Result<u8, EcError> {
        self.wait_ibf_clear()?;
        self.port.outb(EC_SC_PORT, EC_CMD_READ)?;
        self.wait_ibf_clear()?;
        self.port.outb(EC_DATA_PORT, address)?;
        self.wait_obf_set()?;
        let value = self.port.inb(EC_DATA_PORT)?;
        tracing::debug!(
            address = format_args!("0x{address:02x}"),
            value = format_args!("0x{value:02x}"),
            "read_byte",
        );
        Ok(value)
    }

    fn write_byte(&mut self, address: u8, value: u8) -> Result<(), EcError> {
        tracing::debug!(
            address = format_args!("0x{address:02x}"),
            value = format_args!("0x{value:02x}"),
            "write_byte",
        );
        self.wait_ibf_clear()?;
        self.port.outb(EC_SC_PORT, EC_CMD_WRITE)?;
        self.wait_ibf_clear()?;
        self.port.outb(EC_DATA_PORT, address)?;
        self.wait_ibf_clear()?;
        self.port.outb(EC_DATA_PORT, value)?;
        self.wait_ibf_clear()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct EcController {
    port: Option<Box<dyn PortIo>>,
    status: AccessStatus,
    timing: EcTiming,
}

impl std::fmt::Debug for EcController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcController")
            .field("status", &self.status)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

impl EcController {
    /// Run the startup sequence once:
    ///
    /// ```text
    /// ProbeSecureBoot ──on──────────────────────────► Unavailable
    ///        │off
    /// RequestPortAccess ──denied────────────────────► Unavailable
    ///        │granted
    /// VerifyReadAccess ──fail───────────────────────► Unavailable
    ///        │pass
    ///    Available
    /// ```
    ///
    /// Never fails; the outcome is recorded in [`EcController::access_status`].
    pub fn initialize<F>(probe: &dyn SecureBootProbe, open: F, timing: EcTiming) -> Self
    where
        F: FnOnce() -> io::Result<Box<dyn PortIo>>,
    {
        let secure_boot_enabled = match probe.secure_boot_enabled() {
            Ok(true) => return Self::unavailable(true, AccessError::SecureBootBlocked, timing),
            Ok(false) => false,
            Err(err) => {
                return Self::unavailable(false, AccessError::SecureBootUnknown(err), timing)
            }
        };

        let mut port = match open() {
            Ok(port) => port,
            Err(err) => {
                return Self::unavailable(
                    secure_boot_enabled,
                    AccessError::PermissionDenied(err),
                    timing,
                )
            }
        };

        let probe_result = Handshake {
            port: port.as_mut(),
            timing,
        }
        .read_byte(REG_POWER);
        match probe_result {
            Ok(value) => {
                tracing::info!(
                    power = format_args!("0x{value:02x}"),
                    "EC read verification passed",
                );
                Self {
                    port: Some(port),
                    status: AccessStatus {
                        available: true,
                        secure_boot_enabled,
                        error_message: None,
                    },
                    timing,
                }
            }
            Err(err) => Self::unavailable(
                secure_boot_enabled,
                AccessError::VerificationFailed(err),
                timing,
            ),
        }
    }

    fn unavailable(secure_boot_enabled: bool, reason: AccessError, timing: EcTiming) -> Self {
        tracing::error!(error = %reason, "EC access unavailable");
        Self {
            port: None,
            status: AccessStatus {
                available: false,
                secure_boot_enabled,
                error_message: Some(reason.to_string()),
            },
            timing,
        }
    }

    /// Initialization-time state; never touches hardware.
    pub fn access_status(&self) -> &AccessStatus {
        &self.status
    }

    pub fn is_available(&self) -> bool {
        self.status.available
    }

    pub fn timing(&self) -> EcTiming {
        self.timing
    }

    fn handshake(&mut self) -> Result<Handshake<'_>, EcError> {
        let timing = self.timing;
        match self.port.as_mut() {
            Some(port) => Ok(Handshake {
                port: port.as_mut(),
                timing,
            }),
            None => Err(EcError::Unavailable(
                self.status
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "not initialized".to_string()),
            )),
        }
    }

    /// Read one byte of EC RAM.
    pub fn read_byte(&mut self, address: u8) -> Result<u8, EcError> {
        self.handshake()?.read_byte(address)
    }

    /// Write one byte of EC RAM through the four gated transfers.
    pub fn write_byte(&mut self, address: u8, value: u8) -> Result<(), EcError> {
        self.handshake()?.write_byte(address, value)
    }

    /// Write, wait the fixed settle delay, and read the same address back.
    pub fn write_and_verify(&mut self, address: u8, value: u8) -> Result<u8, EcError> {
        self.write_byte(address, value)?;
        sleep(self.timing.settle_delay);
        self.read_byte(address)
    }

    /// Set brightness `0..=8`. Out-of-range levels are rejected before any
    /// port transfer.
    pub fn set_brightness(&mut self, level: u8) -> Result<Verified, EcError> {
        let level = BrightnessLevel::new(level)
            .map_err(|err| EcError::InvalidArgument(err.to_string()))?;
        let value = level.register_value();
        tracing::info!(
            level = level.get(),
            value = format_args!("0x{value:02x}"),
            "setting brightness",
        );
        let readback = self.write_and_verify(REG_BRIGHTNESS, value)?;
        let success = readback == value;
        if !success {
            tracing::warn!(
                wrote = format_args!("0x{value:02x}"),
                read = format_args!("0x{readback:02x}"),
                "brightness readback mismatch",
            );
        }
        Ok(Verified { success, readback })
    }

    /// Power the frontlight on, then optionally apply a brightness level.
    ///
    /// The chained brightness write only runs after a verified power-on, and
    /// its outcome does not change the returned power result.
    pub fn enable_frontlight(&mut self, level: Option<u8>) -> Result<Verified, EcError> {
        tracing::info!("enabling frontlight");
        let readback = self.write_and_verify(REG_POWER, POWER_ENABLE)?;
        let success = FrontlightState::ON_READBACKS.contains(&readback);
        if !success {
            tracing::warn!(
                wrote = format_args!("0x{POWER_ENABLE:02x}"),
                read = format_args!("0x{readback:02x}"),
                "frontlight enable readback mismatch",
            );
        }

        if success {
            if let Some(level) = level {
                match self.set_brightness(level) {
                    Ok(v) if v.success => {}
                    Ok(v) => tracing::warn!(
                        level,
                        readback = %v.readback_hex(),
                        "brightness after enable did not verify",
                    ),
                    Err(err) => tracing::warn!(level, error = %err, "brightness after enable failed"),
                }
            }
        }

        Ok(Verified { success, readback })
    }

    /// Power the frontlight off. Safe to repeat on an already-off light.
    pub fn disable_frontlight(&mut self) -> Result<Verified, EcError> {
        tracing::info!("disabling frontlight");
        let readback = self.write_and_verify(REG_POWER, POWER_DISABLE)?;
        let success = FrontlightState::OFF_READBACKS.contains(&readback);
        if !success {
            tracing::warn!(
                wrote = format_args!("0x{POWER_DISABLE:02x}"),
                read = format_args!("0x{readback:02x}"),
                "frontlight disable readback mismatch",
            );
        }
        Ok(Verified { success, readback })
    }

    /// Current brightness level, or `None` if access is unavailable, the
    /// read fails, or the register holds an off-step value.
    pub fn read_brightness(&mut self) -> Option<BrightnessLevel> {
        if !self.is_available() {
            return None;
        }
        match self.read_byte(REG_BRIGHTNESS) {
            Ok(value) => BrightnessLevel::from_register(value),
            Err(err) => {
                tracing::warn!(error = %err, "brightness probe failed");
                None
            }
        }
    }

    /// Current power state, or `None` if access is unavailable or the read
    /// fails.
    pub fn frontlight_state(&mut self) -> Option<FrontlightState> {
        if !self.is_available() {
            return None;
        }
        match self.read_byte(REG_POWER) {
            Ok(value) => Some(FrontlightState::from_readback(value)),
            Err(err) => {
                tracing::warn!(error = %err, "frontlight probe failed");
                None
            }
        }
    }
}
