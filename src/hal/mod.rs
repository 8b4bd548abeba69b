//! # Hardware Access Layer
//!
//! Drivers never touch `in`/`out` directly. They hold a [`PortIo`]
//! capability, which is [`X86Ports`] on real hardware and
//! [`mock::MockPorts`] in tests.

#[cfg(test)]
pub mod mock;

use x86_64::instructions::port::Port;

/// Byte/word/dword access to the x86 I/O port space.
pub trait PortIo: Send {
    fn read_u8(&mut self, port: u16) -> u8;
    fn write_u8(&mut self, port: u16, value: u8);
    fn read_u16(&mut self, port: u16) -> u16;
    fn write_u16(&mut self, port: u16, value: u16);
    fn read_u32(&mut self, port: u16) -> u32;
    fn write_u32(&mut self, port: u16, value: u32);
}

/// A contiguous run of I/O ports claimed by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub base: u16,
    pub len: u16,
}

impl PortRange {
    pub const fn new(base: u16, len: u16) -> Self {
        Self { base, len }
    }

    pub const fn single(port: u16) -> Self {
        Self { base: port, len: 1 }
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.base && u32::from(port) < u32::from(self.base) + u32::from(self.len)
    }

    pub fn overlaps(&self, other: &PortRange) -> bool {
        let (a0, a1) = (u32::from(self.base), u32::from(self.base) + u32::from(self.len));
        let (b0, b1) = (u32::from(other.base), u32::from(other.base) + u32::from(other.len));
        a0 < b1 && b0 < a1
    }
}

/// Raw port access through the `x86_64` crate.
///
/// Zero-sized; every driver gets its own copy.
#[derive(Debug, Default, Clone, Copy)]
pub struct X86Ports;

impl PortIo for X86Ports {
    fn read_u8(&mut self, port: u16) -> u8 {
        unsafe { Port::<u8>::new(port).read() }
    }

    fn write_u8(&mut self, port: u16, value: u8) {
        unsafe { Port::<u8>::new(port).write(value) }
    }

    fn read_u16(&mut self, port: u16) -> u16 {
        unsafe { Port::<u16>::new(port).read() }
    }

    fn write_u16(&mut self, port: u16, value: u16) {
        unsafe { Port::<u16>::new(port).write(value) }
    }

    fn read_u32(&mut self, port: u16) -> u32 {
        unsafe { Port::<u32>::new(port).read() }
    }

    fn write_u32(&mut self, port: u16, value: u32) {
        unsafe { Port::<u32>::new(port).write(value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_range_bounds() {
        let ata = PortRange::new(0x1F0, 8);
        assert!(ata.contains(0x1F0));
        assert!(ata.contains(0x1F7));
        assert!(!ata.contains(0x1F8));

        assert!(ata.overlaps(&PortRange::single(0x1F7)));
        assert!(!ata.overlaps(&PortRange::new(0x1F8, 4)));
        assert!(PortRange::new(0xFFFF, 1).contains(0xFFFF));
    }
}
