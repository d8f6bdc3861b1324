//! Brightness / power semantics and startup access states, driven against
//! the simulated EC with production timing.

use std::cell::Cell;
use std::io;
use std::time::Duration;

use rstest::rstest;
use tinta_core::{BrightnessLevel, FrontlightState};
use tinta_ec::registers::{POWER_DISABLE, POWER_ENABLE, REG_BRIGHTNESS, REG_POWER};
use tinta_ec::{
    EcController, EcError, EcTiming, KnownSecureBoot, PortIo, SecureBootProbe, SimulatedEc,
};

fn available(sim: &SimulatedEc) -> EcController {
    let port = sim.clone();
    let ec = EcController::initialize(
        &KnownSecureBoot(false),
        move || Ok(Box::new(port) as Box<dyn PortIo>),
        EcTiming::default(),
    );
    assert!(ec.is_available(), "status: {:?}", ec.access_status());
    sim.clear_log();
    ec
}

// ---------------------------------------------------------------------------
// 1. Brightness
// ---------------------------------------------------------------------------

#[rstest]
fn set_brightness_writes_four_per_level(#[values(0, 1, 2, 3, 4, 5, 6, 7, 8)] level: u8) {
    let sim = SimulatedEc::new();
    let mut ec = available(&sim);

    let result = ec.set_brightness(level).expect("set brightness");

    assert_eq!(sim.register_writes(), vec![(REG_BRIGHTNESS, level * 4)]);
    assert!(result.success);
    assert_eq!(result.readback, level * 4);
    assert_eq!(sim.register(REG_BRIGHTNESS), level * 4);
}

#[rstest]
#[case(9)]
#[case(12)]
#[case(255)]
fn set_brightness_out_of_range_touches_nothing(#[case] level: u8) {
    let sim = SimulatedEc::new();
    let mut ec = available(&sim);

    let err = ec.set_brightness(level).unwrap_err();

    assert!(matches!(err, EcError::InvalidArgument(_)), "got: {err}");
    assert!(err.to_string().contains("0-8"), "got: {err}");
    assert!(sim.writes().is_empty());
    assert_eq!(sim.status_reads(), 0);
}

#[test]
fn brightness_readback_mismatch_is_reported_not_raised() {
    let sim = SimulatedEc::new();
    sim.override_readback(REG_BRIGHTNESS, Some(0x00));
    let mut ec = available(&sim);

    let result = ec.set_brightness(5).expect("mismatch is not an error");

    assert!(!result.success);
    assert_eq!(result.readback, 0x00);
    assert_eq!(result.readback_hex(), "0x00");
}

#[test]
fn write_and_verify_waits_the_settle_delay() {
    let sim = SimulatedEc::new();
    let mut ec = available(&sim);

    let started = std::time::Instant::now();
    ec.write_and_verify(REG_BRIGHTNESS, 0x08).expect("verify");
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[test]
fn read_brightness_maps_register_to_level() {
    let sim = SimulatedEc::new();
    sim.set_register(REG_BRIGHTNESS, 0x1C);
    let mut ec = available(&sim);
    assert_eq!(ec.read_brightness(), Some(BrightnessLevel::new(7).unwrap()));

    sim.set_register(REG_BRIGHTNESS, 0x1D);
    assert_eq!(ec.read_brightness(), None);
}

// ---------------------------------------------------------------------------
// 2. Power
// ---------------------------------------------------------------------------

#[test]
fn enable_then_state_reports_on() {
    let sim = SimulatedEc::new();
    let mut ec = available(&sim);

    let result = ec.enable_frontlight(None).expect("enable");

    assert!(result.success);
    assert_eq!(result.readback, 0x06);
    assert_eq!(sim.register_writes(), vec![(REG_POWER, POWER_ENABLE)]);
    assert_eq!(ec.frontlight_state(), Some(FrontlightState::On));
}

#[test]
fn disable_then_state_reports_off() {
    let sim = SimulatedEc::new();
    let mut ec = available(&sim);
    ec.enable_frontlight(None).expect("enable");

    let result = ec.disable_frontlight().expect("disable");

    assert!(result.success);
    assert_eq!(result.readback, POWER_DISABLE);
    assert_eq!(ec.frontlight_state(), Some(FrontlightState::Off));
}

#[rstest]
#[case(0x06, true)]
#[case(0x0A, true)]
#[case(0x07, false)]
#[case(0x05, false)]
fn enable_accepts_either_settle_value(#[case] settles_to: u8, #[case] expected: bool) {
    let sim = SimulatedEc::new().with_power_settle(settles_to, POWER_DISABLE);
    let mut ec = available(&sim);

    let result = ec.enable_frontlight(None).expect("enable");
    assert_eq!(result.success, expected, "readback 0x{settles_to:02x}");
    assert_eq!(result.readback, settles_to);
}

#[rstest]
#[case(0x05, true)]
#[case(0x09, true)]
#[case(0x06, false)]
fn disable_accepts_either_settle_value(#[case] settles_to: u8, #[case] expected: bool) {
    let sim = SimulatedEc::new().with_power_settle(0x06, settles_to);
    let mut ec = available(&sim);

    let result = ec.disable_frontlight().expect("disable");
    assert_eq!(result.success, expected, "readback 0x{settles_to:02x}");
}

#[test]
fn disable_twice_succeeds_both_times() {
    let sim = SimulatedEc::new();
    let mut ec = available(&sim);

    let first = ec.disable_frontlight().expect("first disable");
    let second = ec.disable_frontlight().expect("second disable");

    assert!(first.success);
    assert!(second.success);
    assert_eq!(
        sim.register_writes(),
        vec![(REG_POWER, POWER_DISABLE), (REG_POWER, POWER_DISABLE)]
    );
}

#[test]
fn enable_with_level_chains_brightness() {
    let sim = SimulatedEc::new();
    let mut ec = available(&sim);

    let result = ec.enable_frontlight(Some(6)).expect("enable");

    assert!(result.success);
    assert_eq!(
        sim.register_writes(),
        vec![(REG_POWER, POWER_ENABLE), (REG_BRIGHTNESS, 24)]
    );
}

#[test]
fn failed_chained_brightness_keeps_power_success() {
    let sim = SimulatedEc::new();
    sim.override_readback(REG_BRIGHTNESS, Some(0x02));
    let mut ec = available(&sim);

    let result = ec.enable_frontlight(Some(3)).expect("enable");
    assert!(result.success, "power verified even though brightness did not");

    let invalid = ec.enable_frontlight(Some(42)).expect("enable");
    assert!(invalid.success, "invalid chained level does not flip power result");
}

#[test]
fn power_mismatch_skips_chained_brightness() {
    let sim = SimulatedEc::new().with_power_settle(0x01, POWER_DISABLE);
    let mut ec = available(&sim);

    let result = ec.enable_frontlight(Some(4)).expect("enable");

    assert!(!result.success);
    assert_eq!(sim.register_writes(), vec![(REG_POWER, POWER_ENABLE)]);
}

// ---------------------------------------------------------------------------
// 3. Startup access states
// ---------------------------------------------------------------------------

struct FailingProbe;

impl SecureBootProbe for FailingProbe {
    fn secure_boot_enabled(&self) -> io::Result<bool> {
        Err(io::Error::new(io::ErrorKind::Other, "efivarfs not readable"))
    }
}

#[test]
fn secure_boot_blocks_before_port_request() {
    let opened = Cell::new(false);
    let mut ec = EcController::initialize(
        &KnownSecureBoot(true),
        || {
            opened.set(true);
            Ok(Box::new(SimulatedEc::new()) as Box<dyn PortIo>)
        },
        EcTiming::default(),
    );

    assert!(!opened.get(), "ports must not be requested under Secure Boot");
    let status = ec.access_status().clone();
    assert!(!status.available);
    assert!(status.secure_boot_enabled);
    assert!(status.error_message.unwrap().contains("Secure Boot"));
    assert_eq!(ec.read_brightness(), None);
    assert_eq!(ec.frontlight_state(), None);
    assert!(matches!(
        ec.set_brightness(3).unwrap_err(),
        EcError::Unavailable(_)
    ));
}

#[test]
fn denied_port_access_is_unavailable() {
    let mut ec = EcController::initialize(
        &KnownSecureBoot(false),
        || Err(io::Error::from(io::ErrorKind::PermissionDenied)),
        EcTiming::default(),
    );

    let status = ec.access_status();
    assert!(!status.available);
    assert!(!status.secure_boot_enabled);
    assert!(status.error_message.as_deref().unwrap().contains("are you root?"));
    assert!(matches!(
        ec.disable_frontlight().unwrap_err(),
        EcError::Unavailable(_)
    ));
}

#[test]
fn unreadable_probe_is_unavailable() {
    let ec = EcController::initialize(
        &FailingProbe,
        || Ok(Box::new(SimulatedEc::new()) as Box<dyn PortIo>),
        EcTiming::default(),
    );
    let status = ec.access_status();
    assert!(!status.available);
    assert!(status
        .error_message
        .as_deref()
        .unwrap()
        .contains("efivarfs not readable"));
}

#[test]
fn failed_verification_read_is_unavailable() {
    let sim = SimulatedEc::new();
    sim.withhold_output(true);
    let port = sim.clone();
    let ec = EcController::initialize(
        &KnownSecureBoot(false),
        move || Ok(Box::new(port) as Box<dyn PortIo>),
        EcTiming {
            buffer_timeout: Duration::from_millis(10),
            ..EcTiming::default()
        },
    );

    let status = ec.access_status();
    assert!(!status.available);
    assert!(status
        .error_message
        .as_deref()
        .unwrap()
        .contains("verification failed"));
    assert!(sim.register_writes().is_empty(), "probe is read-only");
}
