//! EC port and register map for the ThinkBook Plus Gen 4 frontlight.
//!
//! # Handshake
//!
//! The EC is reached through two legacy I/O ports. Every byte moved in
//! either direction is gated on a status flag:
//!
//! - IBF (input buffer full) must be clear before the host writes a byte to
//!   either port; the EC clears it once it has consumed the byte.
//! - OBF (output buffer full) must be set before the host reads the data
//!   port; it is set once the EC has placed a reply byte there.
//!
//! A read is `READ` → address → reply. A write is `WRITE` → address →
//! value, followed by one more IBF-clear wait so the value has been consumed
//! before the caller moves on.

/// Status (read) / command (write) port.
pub const EC_SC_PORT: u16 = 0x66;

/// Data port.
pub const EC_DATA_PORT: u16 = 0x62;

/// Status bit: output buffer full.
pub const EC_STAT_OBF: u8 = 0x01;

/// Status bit: input buffer full.
pub const EC_STAT_IBF: u8 = 0x02;

/// Command byte: read one byte of EC RAM.
pub const EC_CMD_READ: u8 = 0x80;

/// Command byte: write one byte of EC RAM.
pub const EC_CMD_WRITE: u8 = 0x81;

/// Frontlight PWM duty cycle, `0x00..=0x20` in steps of 4.
pub const REG_BRIGHTNESS: u8 = 0x35;

/// Frontlight power control.
pub const REG_POWER: u8 = 0x25;

/// Value written to [`REG_POWER`] to request power on.
pub const POWER_ENABLE: u8 = 0x0A;

/// Value written to [`REG_POWER`] to request power off.
pub const POWER_DISABLE: u8 = 0x05;
