//! PS/2 keyboard on the 8042 controller.
//!
//! The driver turns raw set-1 scancodes into key-down / key-up calls on a
//! [`KeyboardEventHandler`]. Translation to characters is the handler's
//! business; the emulator wants raw codes anyway.

use alloc::sync::Arc;

use spin::Mutex;

use crate::drivers::{Driver, DriverError};
use crate::hal::{PortIo, PortRange};
use crate::interrupts::{InterruptHandler, Resume, TrapFrame};

pub const DATA_PORT: u16 = 0x60;
pub const COMMAND_PORT: u16 = 0x64;
pub const IRQ_LINE: u8 = 1;

const STATUS_OUTPUT_FULL: u8 = 0x01;
const CMD_ENABLE_FIRST_PORT: u8 = 0xAE;
const CMD_READ_CONFIG: u8 = 0x20;
const CMD_WRITE_CONFIG: u8 = 0x60;
const CONFIG_FIRST_PORT_IRQ: u8 = 0x01;
const CONFIG_FIRST_PORT_CLOCK_OFF: u8 = 0x10;
const KBD_ENABLE_SCANNING: u8 = 0xF4;

/// Bytes that are not keys: extended-code prefixes and the controller's
/// acknowledgement.
const PREFIX_EXTENDED: u8 = 0xE0;
const PREFIX_PAUSE: u8 = 0xE1;
const ACK: u8 = 0xFA;
const RELEASE_BIT: u8 = 0x80;

/// Upper bound on stale bytes drained during activation.
const MAX_DRAIN: usize = 32;

static PORTS: [PortRange; 2] = [PortRange::single(DATA_PORT), PortRange::single(COMMAND_PORT)];

/// Receives decoded key transitions.
pub trait KeyboardEventHandler: Send {
    fn on_key_down(&mut self, code: u8);
    fn on_key_up(&mut self, code: u8);
}

pub struct KeyboardDriver<P: PortIo> {
    ports: P,
    handler: Arc<Mutex<dyn KeyboardEventHandler>>,
}

impl<P: PortIo> KeyboardDriver<P> {
    pub fn new(ports: P, handler: Arc<Mutex<dyn KeyboardEventHandler>>) -> Self {
        Self { ports, handler }
    }

    fn deliver(&mut self, scancode: u8) {
        match scancode {
            PREFIX_EXTENDED | PREFIX_PAUSE | ACK => {}
            code if code & RELEASE_BIT != 0 => self.handler.lock().on_key_up(code & !RELEASE_BIT),
            code => self.handler.lock().on_key_down(code),
        }
    }
}

impl<P: PortIo> Driver for KeyboardDriver<P> {
    fn name(&self) -> &'static str {
        "ps2-keyboard"
    }

    fn activate(&mut self) -> Result<(), DriverError> {
        let mut drained = 0;
        while self.ports.read_u8(COMMAND_PORT) & STATUS_OUTPUT_FULL != 0 {
            self.ports.read_u8(DATA_PORT);
            drained += 1;
            if drained == MAX_DRAIN {
                return Err(DriverError::NoDevice);
            }
        }

        self.ports.write_u8(COMMAND_PORT, CMD_ENABLE_FIRST_PORT);
        self.ports.write_u8(COMMAND_PORT, CMD_READ_CONFIG);
        let config = (self.ports.read_u8(DATA_PORT) | CONFIG_FIRST_PORT_IRQ) & !CONFIG_FIRST_PORT_CLOCK_OFF;
        self.ports.write_u8(COMMAND_PORT, CMD_WRITE_CONFIG);
        self.ports.write_u8(DATA_PORT, config);
        self.ports.write_u8(DATA_PORT, KBD_ENABLE_SCANNING);
        Ok(())
    }

    fn ports(&self) -> &[PortRange] {
        &PORTS
    }
}

impl<P: PortIo> InterruptHandler for KeyboardDriver<P> {
    fn handle_interrupt(&mut self, _frame: &mut TrapFrame) -> Resume {
        let scancode = self.ports.read_u8(DATA_PORT);
        self.deliver(scancode);
        Resume::Interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::{Access, MockPorts};
    use std::vec::Vec;

    #[derive(Default)]
    struct Keys {
        events: Vec<(bool, u8)>,
    }

    impl KeyboardEventHandler for Keys {
        fn on_key_down(&mut self, code: u8) {
            self.events.push((true, code));
        }

        fn on_key_up(&mut self, code: u8) {
            self.events.push((false, code));
        }
    }

    fn driver() -> (KeyboardDriver<MockPorts>, MockPorts, Arc<Mutex<Keys>>) {
        let ports = MockPorts::new();
        let keys = Arc::new(Mutex::new(Keys::default()));
        (KeyboardDriver::new(ports.clone(), keys.clone()), ports, keys)
    }

    #[test]
    fn activation_programs_the_controller() {
        let (mut kbd, ports, _) = driver();
        // One stale byte, then an empty buffer.
        ports.push(COMMAND_PORT, 0x01);
        ports.push(DATA_PORT, 0x1C);
        // Controller configuration byte: IRQ off, clock off.
        ports.push(DATA_PORT, 0x10 | 0x40);

        kbd.activate().unwrap();
        assert_eq!(ports.writes_to(COMMAND_PORT), vec![0xAE, 0x20, 0x60]);
        assert_eq!(ports.writes_to(DATA_PORT), vec![0x41, 0xF4]);
    }

    #[test]
    fn stuck_output_buffer_means_no_device() {
        let (mut kbd, ports, _) = driver();
        ports.set(COMMAND_PORT, 0x01);
        assert_eq!(kbd.activate(), Err(DriverError::NoDevice));
        assert!(ports.writes_to(COMMAND_PORT).is_empty());
    }

    #[test]
    fn scancodes_become_key_events() {
        let (mut kbd, ports, keys) = driver();
        let mut frame = TrapFrame::default();
        for code in [0x1E, 0x9E, 0xE0, 0x48, 0xFA, 0x01] {
            ports.push(DATA_PORT, code);
            assert_eq!(kbd.handle_interrupt(&mut frame), Resume::Interrupted);
        }
        assert_eq!(
            keys.lock().events,
            vec![(true, 0x1E), (false, 0x1E), (true, 0x48), (true, 0x01)]
        );
        assert!(ports.log().iter().all(|a| *a == Access::Read8(DATA_PORT)));
    }
}
