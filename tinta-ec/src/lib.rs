//! Embedded Controller register access for the E-Ink frontlight.
//!
//! - [`registers`]: port numbers, status bits, register addresses
//! - [`port`]: [`PortIo`] seam and the `/dev/port` backend
//! - [`secure_boot`]: lockdown detection
//! - [`controller`]: handshake, write/verify, brightness and power
//! - [`sim`]: in-process EC used for development and tests

pub mod controller;
mod error;
pub mod port;
pub mod registers;
pub mod secure_boot;
pub mod sim;

pub use controller::{AccessStatus, EcController, EcTiming, Verified};
pub use error::{AccessError, EcError, TimeoutStage};
pub use port::{DevPort, PortIo};
pub use secure_boot::{EfiVarSecureBoot, KnownSecureBoot, SecureBootProbe};
pub use sim::SimulatedEc;
