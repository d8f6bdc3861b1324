//! Domain types shared by the EC engine, the daemon, and the CLI.
//!
//! These are the values that cross the socket boundary in serialized form,
//! so every type here is serde-compatible.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Brightness
// ---------------------------------------------------------------------------

/// Frontlight brightness level in `0..=8`.
///
/// The EC stores brightness as a PWM duty value in steps of 4, so level `n`
/// maps to register value `n * 4` (`0x00..=0x20`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct BrightnessLevel(u8);

impl BrightnessLevel {
    pub const MIN: BrightnessLevel = BrightnessLevel(0);
    pub const MAX: BrightnessLevel = BrightnessLevel(8);

    /// Register step between adjacent levels.
    pub const STEP: u8 = 4;

    /// Validate a raw level.
    pub fn new(level: u8) -> Result<Self, InvalidBrightness> {
        if level <= Self::MAX.0 {
            Ok(Self(level))
        } else {
            Err(InvalidBrightness(i64::from(level)))
        }
    }

    /// Validate a level that arrived as an arbitrary integer (e.g. from JSON).
    pub fn from_i64(level: i64) -> Result<Self, InvalidBrightness> {
        u8::try_from(level)
            .ok()
            .and_then(|l| Self::new(l).ok())
            .ok_or(InvalidBrightness(level))
    }

    /// Map a brightness register value back to a level.
    ///
    /// Returns `None` for values that are not an exact step or exceed `0x20`.
    pub fn from_register(value: u8) -> Option<Self> {
        if value % Self::STEP != 0 {
            return None;
        }
        Self::new(value / Self::STEP).ok()
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// The duty-cycle value written to the brightness register.
    pub fn register_value(self) -> u8 {
        self.0 * Self::STEP
    }

    /// All valid levels, lowest first.
    pub fn all() -> impl Iterator<Item = BrightnessLevel> {
        (Self::MIN.0..=Self::MAX.0).map(BrightnessLevel)
    }
}

impl fmt::Display for BrightnessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<u8> for BrightnessLevel {
    type Error = InvalidBrightness;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BrightnessLevel> for u8 {
    fn from(level: BrightnessLevel) -> Self {
        level.0
    }
}

/// A brightness level outside `0..=8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Brightness level must be 0-8 (got {0})")]
pub struct InvalidBrightness(pub i64);

// ---------------------------------------------------------------------------
// Frontlight power
// ---------------------------------------------------------------------------

/// Frontlight power state as classified from a power-register readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "raw")]
pub enum FrontlightState {
    On,
    Off,
    /// Readback matched neither accepted set.
    Unknown(u8),
}

impl FrontlightState {
    /// Readbacks accepted after requesting power on. The EC may report either
    /// the settled `0x06` or the just-written `0x0A`.
    pub const ON_READBACKS: [u8; 2] = [0x06, 0x0A];

    /// Readbacks accepted after requesting power off.
    pub const OFF_READBACKS: [u8; 2] = [0x05, 0x09];

    pub fn from_readback(value: u8) -> Self {
        if Self::ON_READBACKS.contains(&value) {
            FrontlightState::On
        } else if Self::OFF_READBACKS.contains(&value) {
            FrontlightState::Off
        } else {
            FrontlightState::Unknown(value)
        }
    }

    pub fn is_on(self) -> bool {
        matches!(self, FrontlightState::On)
    }
}

impl fmt::Display for FrontlightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrontlightState::On => f.write_str("on"),
            FrontlightState::Off => f.write_str("off"),
            FrontlightState::Unknown(raw) => write!(f, "unknown (0x{raw:02x})"),
        }
    }
}
