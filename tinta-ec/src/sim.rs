//! In-process EC simulator.
//!
//! Models the IBF/OBF handshake and a 256-byte register file closely enough
//! to drive [`crate::EcController`] without privileges. The daemon uses it
//! when `ec.simulate` is set; the test suites use it to observe every port
//! transfer and to inject faults.
//!
//! Clones share state, so a test can keep one handle for inspection after
//! moving another into the controller.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::port::PortIo;
use crate::registers::{
    EC_CMD_READ, EC_CMD_WRITE, EC_DATA_PORT, EC_SC_PORT, EC_STAT_IBF, EC_STAT_OBF,
    POWER_DISABLE, POWER_ENABLE, REG_POWER,
};

/// One `outb` observed by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortWrite {
    pub port: u16,
    pub value: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    ReadAddress,
    WriteAddress,
    WriteValue(u8),
}

#[derive(Debug)]
struct SimState {
    registers: [u8; 256],
    phase: Phase,
    output: Option<u8>,
    writes: Vec<PortWrite>,
    status_reads: usize,
    power_on_settle: u8,
    power_off_settle: u8,
    readback_override: [Option<u8>; 256],
    ibf_stuck: bool,
    obf_never_set: bool,
}

#[derive(Debug, Clone)]
pub struct SimulatedEc {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedEc {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEc {
    /// A responsive EC with the frontlight off and brightness at 0. Power-on
    /// settles to `0x06`, power-off to `0x05`.
    pub fn new() -> Self {
        let mut registers = [0u8; 256];
        registers[usize::from(REG_POWER)] = POWER_DISABLE;
        Self {
            state: Arc::new(Mutex::new(SimState {
                registers,
                phase: Phase::Idle,
                output: None,
                writes: Vec::new(),
                status_reads: 0,
                power_on_settle: 0x06,
                power_off_settle: POWER_DISABLE,
                readback_override: [None; 256],
                ibf_stuck: false,
                obf_never_set: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Values the power register settles to after enable / disable writes.
    pub fn with_power_settle(self, on: u8, off: u8) -> Self {
        {
            let mut state = self.lock();
            state.power_on_settle = on;
            state.power_off_settle = off;
        }
        self
    }

    /// Keep IBF asserted forever, so every write gate times out.
    pub fn stick_input_buffer(&self, stuck: bool) {
        self.lock().ibf_stuck = stuck;
    }

    /// Never raise OBF, so reads time out waiting for the reply.
    pub fn withhold_output(&self, withheld: bool) {
        self.lock().obf_never_set = withheld;
    }

    /// Force reads of `address` to return `value` regardless of writes.
    pub fn override_readback(&self, address: u8, value: Option<u8>) {
        self.lock().readback_override[usize::from(address)] = value;
    }

    pub fn register(&self, address: u8) -> u8 {
        self.lock().registers[usize::from(address)]
    }

    pub fn set_register(&self, address: u8, value: u8) {
        self.lock().registers[usize::from(address)] = value;
    }

    /// Every `outb`, oldest first.
    pub fn writes(&self) -> Vec<PortWrite> {
        self.lock().writes.clone()
    }

    /// `(address, value)` pairs of completed register writes.
    pub fn register_writes(&self) -> Vec<(u8, u8)> {
        let writes = self.writes();
        writes
            .windows(3)
            .filter(|w| {
                w[0].port == EC_SC_PORT
                    && w[0].value == EC_CMD_WRITE
                    && w[1].port == EC_DATA_PORT
                    && w[2].port == EC_DATA_PORT
            })
            .map(|w| (w[1].value, w[2].value))
            .collect()
    }

    pub fn status_reads(&self) -> usize {
        self.lock().status_reads
    }

    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.writes.clear();
        state.status_reads = 0;
    }
}

impl SimState {
    fn settle(&self, address: u8, value: u8) -> u8 {
        if address != REG_POWER {
            return value;
        }
        match value {
            POWER_ENABLE => self.power_on_settle,
            POWER_DISABLE => self.power_off_settle,
            other => other,
        }
    }
}

impl PortIo for SimulatedEc {
    fn inb(&mut self, port: u16) -> io::Result<u8> {
        let mut state = self.lock();
        match port {
            EC_SC_PORT => {
                state.status_reads += 1;
                let mut status = 0;
                if state.ibf_stuck {
                    status |= EC_STAT_IBF;
                }
                if state.output.is_some() && !state.obf_never_set {
                    status |= EC_STAT_OBF;
                }
                Ok(status)
            }
            EC_DATA_PORT => Ok(state.output.take().unwrap_or(0)),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("simulated EC has no port 0x{other:02x}"),
            )),
        }
    }

    fn outb(&mut self, port: u16, value: u8) -> io::Result<()> {
        let mut state = self.lock();
        state.writes.push(PortWrite { port, value });
        match (port, state.phase) {
            (EC_SC_PORT, _) => {
                state.phase = match value {
                    EC_CMD_READ => Phase::ReadAddress,
                    EC_CMD_WRITE => Phase::WriteAddress,
                    _ => Phase::Idle,
                };
            }
            (EC_DATA_PORT, Phase::ReadAddress) => {
                let idx = usize::from(value);
                let reply = state.readback_override[idx].unwrap_or(state.registers[idx]);
                state.output = Some(reply);
                state.phase = Phase::Idle;
            }
            (EC_DATA_PORT, Phase::WriteAddress) => {
                state.phase = Phase::WriteValue(value);
            }
            (EC_DATA_PORT, Phase::WriteValue(address)) => {
                let settled = state.settle(address, value);
                state.registers[usize::from(address)] = settled;
                state.phase = Phase::Idle;
            }
            (EC_DATA_PORT, Phase::Idle) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "data byte written with no command in progress",
                ));
            }
            (other, _) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("simulated EC has no port 0x{other:02x}"),
                ));
            }
        }
        Ok(())
    }
}
