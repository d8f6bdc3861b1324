//! tinta core library: shared domain types, configuration, errors.
//!
//! - [`types`]: brightness and frontlight newtypes
//! - [`config`]: YAML [`DaemonConfig`] load / validate
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{ClientConfig, DaemonConfig, EcConfig, PanelConfig};
pub use error::ConfigError;
pub use types::{BrightnessLevel, FrontlightState, InvalidBrightness};
