//! Command dispatch: one request in, one response out.
//!
//! Every request resets the watchdog before anything else happens, so even
//! a malformed or unknown command counts as client activity. Hardware errors
//! never escape; they become failed envelopes.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tinta_core::{BrightnessLevel, DaemonConfig};
use tinta_ec::{
    DevPort, EcController, EcTiming, EfiVarSecureBoot, KnownSecureBoot, PortIo, SimulatedEc,
    Verified,
};

use crate::panel::{ExternalPanel, PanelController, PanelError, UnconfiguredPanel};
use crate::protocol::{Request, Response};
use crate::watchdog::Watchdog;

// ---------------------------------------------------------------------------
// Hardware aggregate
// ---------------------------------------------------------------------------

/// Everything that touches hardware. Held under one lock for the whole of a
/// command so EC transfers and panel operations never interleave.
pub struct Hardware {
    pub ec: EcController,
    pub panel: Box<dyn PanelController>,
}

impl std::fmt::Debug for Hardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hardware")
            .field("ec", &self.ec)
            .finish_non_exhaustive()
    }
}

pub type SharedHardware = Arc<Mutex<Hardware>>;

impl Hardware {
    pub fn new(ec: EcController, panel: Box<dyn PanelController>) -> Self {
        Self { ec, panel }
    }

    /// Build the EC controller and panel collaborator described by `config`.
    /// EC unavailability is recorded, not returned.
    pub fn from_config(config: &DaemonConfig) -> Self {
        let ec = if config.ec.simulate {
            tracing::warn!("using simulated EC; no hardware will be touched");
            EcController::initialize(
                &KnownSecureBoot(false),
                || Ok(Box::new(SimulatedEc::new()) as Box<dyn PortIo>),
                EcTiming::default(),
            )
        } else {
            let probe = EfiVarSecureBoot::new(&config.ec.secure_boot_efivar);
            let dev_port = config.ec.dev_port.clone();
            EcController::initialize(
                &probe,
                move || Ok(Box::new(DevPort::open(&dev_port)?) as Box<dyn PortIo>),
                EcTiming::default(),
            )
        };

        let status = ec.access_status();
        if status.available {
            tracing::info!("EC access available");
        } else {
            tracing::warn!(
                secure_boot = status.secure_boot_enabled,
                error = status.error_message.as_deref().unwrap_or("unknown"),
                "EC access unavailable; frontlight commands will fail",
            );
        }

        let panel: Box<dyn PanelController> = match &config.panel.program {
            Some(program) => Box::new(ExternalPanel::new(
                program,
                config.panel.args.clone(),
                config.panel.timeout(),
            )),
            None => Box::new(UnconfiguredPanel),
        };

        Self::new(ec, panel)
    }

    pub fn shared(self) -> SharedHardware {
        Arc::new(Mutex::new(self))
    }
}

/// Lock the hardware, recovering from a poisoned lock. A panic mid-command
/// leaves the hardware in whatever state it was; the next command finds out.
pub fn lock_hardware(hardware: &SharedHardware) -> MutexGuard<'_, Hardware> {
    hardware.lock().unwrap_or_else(|poisoned| {
        tracing::error!("hardware lock poisoned by a panicked command; recovering");
        poisoned.into_inner()
    })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Keepalive,
    EnableEink,
    EnableOled,
    RefreshEink,
    RefreshEinkQuick,
    EnableFrontlight,
    DisableFrontlight,
    SetBrightness,
    GetStatus,
    Shutdown,
}

impl Command {
    pub const ALL: [Command; 10] = [
        Command::Keepalive,
        Command::EnableEink,
        Command::EnableOled,
        Command::RefreshEink,
        Command::RefreshEinkQuick,
        Command::EnableFrontlight,
        Command::DisableFrontlight,
        Command::SetBrightness,
        Command::GetStatus,
        Command::Shutdown,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Keepalive => "keepalive",
            Command::EnableEink => "enable-eink",
            Command::EnableOled => "enable-oled",
            Command::RefreshEink => "refresh-eink",
            Command::RefreshEinkQuick => "refresh-eink-quick",
            Command::EnableFrontlight => "enable-frontlight",
            Command::DisableFrontlight => "disable-frontlight",
            Command::SetBrightness => "set-brightness",
            Command::GetStatus => "get-status",
            Command::Shutdown => "shutdown",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.name() == name)
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Dispatcher {
    hardware: SharedHardware,
    watchdog: Watchdog,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl Dispatcher {
    pub fn new(hardware: SharedHardware, watchdog: Watchdog) -> Self {
        Self {
            hardware,
            watchdog,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Execute one request. Blocks for the duration of any hardware work;
    /// call from a blocking context.
    pub fn dispatch(&self, request: &Request) -> Response {
        self.watchdog.reset();

        let Some(command) = Command::parse(&request.command) else {
            tracing::warn!(command = %request.command, "unknown command");
            return Response::failure(format!("Unknown command: {}", request.command));
        };
        tracing::debug!(command = command.name(), "dispatching");

        match command {
            Command::Keepalive => Response::ok("pong"),
            Command::Shutdown => Response::ok("Shutting down"),
            Command::EnableEink => {
                self.panel(|panel| panel.switch_to_eink(), "Switched to E-Ink display")
            }
            Command::EnableOled => {
                self.panel(|panel| panel.switch_to_oled(), "Switched to OLED display")
            }
            Command::RefreshEink => {
                self.panel(|panel| panel.refresh_full(), "E-Ink full refresh completed")
            }
            Command::RefreshEinkQuick => {
                self.panel(|panel| panel.refresh_quick(), "E-Ink quick refresh completed")
            }
            Command::EnableFrontlight => {
                let level = match optional_level(&request.params) {
                    Ok(level) => level,
                    Err(message) => return Response::failure(message),
                };
                let result = lock_hardware(&self.hardware).ec.enable_frontlight(level);
                verified(
                    result,
                    "Frontlight enabled",
                    "Frontlight enable failed (readback mismatch)",
                )
            }
            Command::DisableFrontlight => {
                let result = lock_hardware(&self.hardware).ec.disable_frontlight();
                verified(
                    result,
                    "Frontlight disabled",
                    "Frontlight disable failed (readback mismatch)",
                )
            }
            Command::SetBrightness => {
                let level = match optional_level(&request.params) {
                    Ok(Some(level)) => level,
                    Ok(None) => return Response::failure("Missing required parameter: level"),
                    Err(message) => return Response::failure(message),
                };
                let result = lock_hardware(&self.hardware).ec.set_brightness(level);
                verified(
                    result,
                    &format!("Brightness set to {level}"),
                    "Brightness set failed (readback mismatch)",
                )
                .with_field("level", level)
            }
            Command::GetStatus => self.status(),
        }
    }

    fn panel(
        &self,
        operation: impl FnOnce(&mut dyn PanelController) -> Result<(), PanelError>,
        message: &str,
    ) -> Response {
        let mut hardware = lock_hardware(&self.hardware);
        match operation(hardware.panel.as_mut()) {
            Ok(()) => Response::ok(message),
            Err(err) => {
                tracing::error!(error = %err, "panel operation failed");
                Response::failure(err.to_string())
            }
        }
    }

    fn status(&self) -> Response {
        let mut hardware = lock_hardware(&self.hardware);
        let access = hardware.ec.access_status().clone();
        let brightness = hardware.ec.read_brightness().map(|level| level.get());
        let frontlight = hardware.ec.frontlight_state().map(|state| state.to_string());
        drop(hardware);

        Response::ok("Helper running")
            .with_field(
                "ec",
                json!({
                    "available": access.available,
                    "secure_boot_enabled": access.secure_boot_enabled,
                    "error_message": access.error_message,
                }),
            )
            .with_field("brightness", brightness)
            .with_field("frontlight", frontlight)
            .with_field("pid", std::process::id())
            .with_field("uptime_secs", self.started.elapsed().as_secs())
            .with_field("started_at", self.started_at.to_rfc3339())
            .with_field(
                "watchdog_timeout_ms",
                duration_ms(self.watchdog.timeout()),
            )
    }
}

fn verified(
    result: Result<Verified, tinta_ec::EcError>,
    ok_message: &str,
    failed_message: &str,
) -> Response {
    match result {
        Ok(outcome) => Response::verified(outcome.success, ok_message, failed_message)
            .with_field("readback", outcome.readback_hex()),
        Err(err) => {
            tracing::error!(error = %err, "EC operation failed");
            Response::failure(err.to_string())
        }
    }
}

/// `level` may arrive as an integer, a whole float, or a numeric string.
/// Out-of-range levels are refused here so no command touches the EC with one.
fn optional_level(params: &Map<String, Value>) -> Result<Option<u8>, String> {
    let Some(raw) = params.get("level") else {
        return Ok(None);
    };
    let level = match raw {
        Value::Null => return Ok(None),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("Invalid brightness level: {raw}"))?;

    BrightnessLevel::from_i64(level)
        .map(|level| Some(level.get()))
        .map_err(|err| err.to_string())
}

fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
