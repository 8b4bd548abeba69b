//! # Programmable Interrupt Controller (8259 PIC)
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐
//! │   PIC 1     │     │   PIC 2     │
//! │  (Master)   │◀────│  (Slave)    │
//! │ IRQ 0-7     │     │ IRQ 8-15    │
//! └─────────────┘     └─────────────┘
//!       │
//!       ▼
//!     CPU
//! ```
//!
//! Out of reset the PICs deliver IRQ 0-7 on vectors 8-15, right on top of
//! the CPU exceptions. They are remapped to `irq_base..irq_base + 16`.
//!
//! A line that drops before the CPU acknowledges it still gets delivered,
//! as the lowest-priority line of whichever chip saw it (IRQ 7 or 15). The
//! in-service register tells those apart from real ones.

use pic8259::ChainedPics;

use crate::hal::{PortIo, X86Ports};

const MASTER_COMMAND: u16 = 0x20;
const SLAVE_COMMAND: u16 = 0xA0;
/// OCW3: the next command-port read returns the in-service register.
const READ_ISR: u8 = 0x0B;
const END_OF_INTERRUPT: u8 = 0x20;
const MASTER_SPURIOUS_LINE: u8 = 7;
const SLAVE_SPURIOUS_LINE: u8 = 15;

/// Acknowledgement and masking for whatever chip delivers the IRQ lines.
pub trait InterruptController: Send {
    /// Remap the lines and leave them all masked.
    fn initialize(&mut self);
    /// Signal end-of-interrupt for the line delivered on `vector`.
    fn end_of_interrupt(&mut self, vector: u8);
    /// Unmask every line.
    fn enable(&mut self);
    /// True when nothing is actually in service for `vector`. The chip gets
    /// whatever acknowledgement it still needs here; the caller then runs
    /// no handler and sends no EOI.
    fn is_spurious(&mut self, _vector: u8) -> bool {
        false
    }
}

/// Legacy IRQ lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Irq {
    Timer = 0,
    Keyboard = 1,
    Cascade = 2,
    Com2 = 3,
    Com1 = 4,
    Mouse = 12,
    PrimaryAta = 14,
    SecondaryAta = 15,
}

impl Irq {
    pub const fn line(self) -> u8 {
        self as u8
    }
}

/// The chained pair. `P` only serves the in-service register reads; the
/// `pic8259` crate does the rest.
pub struct Pic8259<P: PortIo = X86Ports> {
    pics: ChainedPics,
    ports: P,
    irq_base: u8,
}

impl Pic8259 {
    /// # Safety
    /// `irq_base` must leave both 8-vector windows clear of CPU exceptions
    /// and of every other vector in use.
    pub unsafe fn new(irq_base: u8) -> Self {
        Self::with_ports(irq_base, X86Ports)
    }
}

impl<P: PortIo> Pic8259<P> {
    /// # Safety
    /// Same as [`Pic8259::new`].
    pub unsafe fn with_ports(irq_base: u8, ports: P) -> Self {
        Self {
            pics: ChainedPics::new(irq_base, irq_base + 8),
            ports,
            irq_base,
        }
    }

    fn in_service(&mut self, command: u16) -> u8 {
        self.ports.write_u8(command, READ_ISR);
        self.ports.read_u8(command)
    }
}

impl<P: PortIo> InterruptController for Pic8259<P> {
    fn initialize(&mut self) {
        unsafe {
            self.pics.initialize();
            self.pics.write_masks(0xFF, 0xFF);
        }
    }

    fn end_of_interrupt(&mut self, vector: u8) {
        unsafe { self.pics.notify_end_of_interrupt(vector) };
    }

    fn enable(&mut self) {
        unsafe { self.pics.write_masks(0x00, 0x00) };
    }

    fn is_spurious(&mut self, vector: u8) -> bool {
        let command = match vector.wrapping_sub(self.irq_base) {
            MASTER_SPURIOUS_LINE => MASTER_COMMAND,
            SLAVE_SPURIOUS_LINE => SLAVE_COMMAND,
            _ => return false,
        };
        // Both spurious lines are bit 7 of their own chip.
        if self.in_service(command) & 0x80 != 0 {
            return false;
        }
        if command == SLAVE_COMMAND {
            // The master did see the cascade line raised.
            self.ports.write_u8(MASTER_COMMAND, END_OF_INTERRUPT);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockPorts;

    fn pic() -> (Pic8259<MockPorts>, MockPorts) {
        let ports = MockPorts::new();
        let pic = unsafe { Pic8259::with_ports(0x20, ports.clone()) };
        (pic, ports)
    }

    #[test]
    fn phantom_irq7_gets_no_eoi() {
        let (mut pic, ports) = pic();
        ports.push(MASTER_COMMAND, 0x00);
        assert!(pic.is_spurious(0x27));
        assert_eq!(ports.writes_to(MASTER_COMMAND), vec![u32::from(READ_ISR)]);
        assert!(ports.writes_to(SLAVE_COMMAND).is_empty());
    }

    #[test]
    fn real_irq7_is_in_service() {
        let (mut pic, ports) = pic();
        ports.push(MASTER_COMMAND, 0x80);
        assert!(!pic.is_spurious(0x27));
    }

    #[test]
    fn phantom_irq15_still_acknowledges_the_master() {
        let (mut pic, ports) = pic();
        ports.push(SLAVE_COMMAND, 0x00);
        assert!(pic.is_spurious(0x2F));
        assert_eq!(ports.writes_to(SLAVE_COMMAND), vec![u32::from(READ_ISR)]);
        assert_eq!(ports.writes_to(MASTER_COMMAND), vec![u32::from(END_OF_INTERRUPT)]);

        ports.clear_log();
        ports.push(SLAVE_COMMAND, 0x80);
        assert!(!pic.is_spurious(0x2F));
        assert!(ports.writes_to(MASTER_COMMAND).is_empty());
    }

    #[test]
    fn other_lines_skip_the_register_read() {
        let (mut pic, ports) = pic();
        assert!(!pic.is_spurious(0x20));
        assert!(!pic.is_spurious(0x2E));
        assert!(!pic.is_spurious(0x07));
        assert!(ports.log().is_empty());
    }
}
