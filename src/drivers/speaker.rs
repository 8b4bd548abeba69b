//! PC speaker, fed by PIT channel 2.

use crate::drivers::{Driver, DriverError};
use crate::hal::{PortIo, PortRange};

const PIT_CHANNEL2: u16 = 0x42;
const PIT_COMMAND: u16 = 0x43;
const SPEAKER_GATE: u16 = 0x61;

/// Channel 2, lobyte/hibyte, mode 3, binary.
const CHANNEL2_SQUARE_WAVE: u8 = 0xB6;
/// Timer 2 gate and speaker data enable.
const GATE_BITS: u8 = 0x03;

const BASE_FREQUENCY: u32 = 1_193_180;

static PORTS: [PortRange; 3] = [
    PortRange::single(PIT_CHANNEL2),
    PortRange::single(PIT_COMMAND),
    PortRange::single(SPEAKER_GATE),
];

pub struct SpeakerDriver<P: PortIo> {
    ports: P,
    frequency: Option<u32>,
}

impl<P: PortIo> SpeakerDriver<P> {
    pub fn new(ports: P) -> Self {
        Self {
            ports,
            frequency: None,
        }
    }

    /// Starts a square wave at roughly `frequency` Hz. Zero is silence.
    pub fn sound(&mut self, frequency: u32) {
        if frequency == 0 {
            self.silence();
            return;
        }
        let divisor = (BASE_FREQUENCY / frequency).clamp(1, u32::from(u16::MAX));
        self.ports.write_u8(PIT_COMMAND, CHANNEL2_SQUARE_WAVE);
        self.ports.write_u8(PIT_CHANNEL2, divisor as u8);
        self.ports.write_u8(PIT_CHANNEL2, (divisor >> 8) as u8);

        let gate = self.ports.read_u8(SPEAKER_GATE);
        if gate & GATE_BITS != GATE_BITS {
            self.ports.write_u8(SPEAKER_GATE, gate | GATE_BITS);
        }
        self.frequency = Some(frequency);
    }

    pub fn silence(&mut self) {
        let gate = self.ports.read_u8(SPEAKER_GATE);
        self.ports.write_u8(SPEAKER_GATE, gate & !GATE_BITS);
        self.frequency = None;
    }

    pub fn frequency(&self) -> Option<u32> {
        self.frequency
    }
}

impl<P: PortIo> Driver for SpeakerDriver<P> {
    fn name(&self) -> &'static str {
        "pc-speaker"
    }

    fn activate(&mut self) -> Result<(), DriverError> {
        self.silence();
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), DriverError> {
        self.silence();
        Ok(())
    }

    fn reset(&mut self) -> Result<(), DriverError> {
        self.silence();
        Ok(())
    }

    fn ports(&self) -> &[PortRange] {
        &PORTS
    }
}
