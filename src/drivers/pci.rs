//! PCI configuration space through the legacy 0xCF8/0xCFC mechanism.
//!
//! ```text
//! 31      30..24   23..16  15..11   10..8     7..2      1..0
//! enable  reserved bus     device   function  register  00
//! ```

use alloc::vec::Vec;

use crate::drivers::{Driver, DriverError};
use crate::hal::{PortIo, PortRange};

pub const CONFIG_ADDRESS: u16 = 0xCF8;
pub const CONFIG_DATA: u16 = 0xCFC;

const BUSES: u8 = 8;
const DEVICES: u8 = 32;
const FUNCTIONS: u8 = 8;

const REG_VENDOR_ID: u8 = 0x00;
const REG_DEVICE_ID: u8 = 0x02;
const REG_REVISION: u8 = 0x08;
const REG_PROG_IF: u8 = 0x09;
const REG_SUBCLASS: u8 = 0x0A;
const REG_CLASS: u8 = 0x0B;
const REG_HEADER_TYPE: u8 = 0x0E;
const REG_BAR0: u8 = 0x10;
const REG_INTERRUPT_LINE: u8 = 0x3C;

const MULTIFUNCTION: u32 = 0x80;

static PORTS: [PortRange; 2] = [PortRange::new(CONFIG_ADDRESS, 4), PortRange::new(CONFIG_DATA, 4)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub vendor_id: u16,
    pub device_id: u16,
    pub class_id: u8,
    pub subclass_id: u8,
    pub interface_id: u8,
    pub revision: u8,
    pub interrupt: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarKind {
    Bits32,
    Below1M,
    Bits64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseAddressRegister {
    Io { port: u32 },
    Memory {
        address: u32,
        prefetchable: bool,
        kind: BarKind,
    },
}

pub fn config_address(bus: u8, device: u8, function: u8, offset: u8) -> u32 {
    1 << 31
        | u32::from(bus) << 16
        | u32::from(device & 0x1F) << 11
        | u32::from(function & 0x07) << 8
        | u32::from(offset & 0xFC)
}

pub struct PciController<P: PortIo> {
    ports: P,
    devices: Vec<DeviceDescriptor>,
}

impl<P: PortIo> PciController<P> {
    pub fn new(ports: P) -> Self {
        Self {
            ports,
            devices: Vec::new(),
        }
    }

    /// Reads the register containing `offset`, shifted so the addressed
    /// byte is bit 0.
    pub fn read(&mut self, bus: u8, device: u8, function: u8, offset: u8) -> u32 {
        self.ports
            .write_u32(CONFIG_ADDRESS, config_address(bus, device, function, offset));
        self.ports.read_u32(CONFIG_DATA) >> (8 * u32::from(offset % 4))
    }

    pub fn write(&mut self, bus: u8, device: u8, function: u8, offset: u8, value: u32) {
        self.ports
            .write_u32(CONFIG_ADDRESS, config_address(bus, device, function, offset));
        self.ports.write_u32(CONFIG_DATA, value);
    }

    pub fn has_functions(&mut self, bus: u8, device: u8) -> bool {
        self.read(bus, device, 0, REG_HEADER_TYPE) & MULTIFUNCTION != 0
    }

    pub fn descriptor(&mut self, bus: u8, device: u8, function: u8) -> DeviceDescriptor {
        DeviceDescriptor {
            bus,
            device,
            function,
            vendor_id: self.read(bus, device, function, REG_VENDOR_ID) as u16,
            device_id: self.read(bus, device, function, REG_DEVICE_ID) as u16,
            class_id: self.read(bus, device, function, REG_CLASS) as u8,
            subclass_id: self.read(bus, device, function, REG_SUBCLASS) as u8,
            interface_id: self.read(bus, device, function, REG_PROG_IF) as u8,
            revision: self.read(bus, device, function, REG_REVISION) as u8,
            interrupt: self.read(bus, device, function, REG_INTERRUPT_LINE) as u8,
        }
    }

    /// Decodes BAR `bar`. Type 0 headers have six, PCI-to-PCI bridges two.
    pub fn bar(&mut self, bus: u8, device: u8, function: u8, bar: u8) -> Option<BaseAddressRegister> {
        let header_type = self.read(bus, device, function, REG_HEADER_TYPE) & 0x7F;
        let max_bars = match header_type {
            0x00 => 6,
            0x01 => 2,
            _ => 0,
        };
        if bar >= max_bars {
            return None;
        }

        let value = self.read(bus, device, function, REG_BAR0 + 4 * bar);
        if value & 0x1 != 0 {
            return Some(BaseAddressRegister::Io { port: value & !0x3 });
        }
        let kind = match (value >> 1) & 0x3 {
            0 => BarKind::Bits32,
            1 => BarKind::Below1M,
            _ => BarKind::Bits64,
        };
        Some(BaseAddressRegister::Memory {
            address: value & !0xF,
            prefetchable: value & 0x8 != 0,
            kind,
        })
    }

    /// Walks buses 0..8 and records every function that answers.
    pub fn enumerate(&mut self) -> &[DeviceDescriptor] {
        self.devices.clear();
        for bus in 0..BUSES {
            for device in 0..DEVICES {
                let functions = if self.has_functions(bus, device) { FUNCTIONS } else { 1 };
                for function in 0..functions {
                    let desc = self.descriptor(bus, device, function);
                    if desc.vendor_id == 0x0000 || desc.vendor_id == 0xFFFF {
                        continue;
                    }
                    log::info!(
                        "pci: {:02x}:{:02x}.{} vendor {:04x} device {:04x} class {:02x}.{:02x} irq {}",
                        bus,
                        device,
                        function,
                        desc.vendor_id,
                        desc.device_id,
                        desc.class_id,
                        desc.subclass_id,
                        desc.interrupt
                    );
                    self.devices.push(desc);
                }
            }
        }
        &self.devices
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }
}

impl<P: PortIo> Driver for PciController<P> {
    fn name(&self) -> &'static str {
        "pci"
    }

    fn activate(&mut self) -> Result<(), DriverError> {
        let found = self.enumerate().len();
        log::info!("pci: {} functions", found);
        Ok(())
    }

    fn ports(&self) -> &[PortRange] {
        &PORTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockPorts;

    /// Host bridge at 00:00.0, multifunction ISA bridge at 00:01 with an
    /// IDE controller on function 1.
    fn config_space(address: u32) -> u32 {
        let bus = (address >> 16) & 0xFF;
        let device = (address >> 11) & 0x1F;
        let function = (address >> 8) & 0x7;
        let register = address & 0xFC;
        match (bus, device, function, register) {
            (0, 0, 0, 0x00) => 0x1237_8086,
            (0, 0, 0, 0x08) => 0x0600_0002,
            (0, 1, 0, 0x00) => 0x7000_8086,
            (0, 1, 0, 0x08) => 0x0601_0000,
            (0, 1, 0, 0x0C) => 0x0080_0000,
            (0, 1, 1, 0x00) => 0x7010_8086,
            (0, 1, 1, 0x08) => 0x0101_8000,
            (0, 1, 1, 0x20) => 0x0000_C001,
            (0, 1, 1, 0x24) => 0xFEB0_000C,
            (0, 1, 1, 0x3C) => 0x0000_010E,
            (0, _, _, _) if device <= 1 => 0,
            _ => 0xFFFF_FFFF,
        }
    }

    fn controller() -> (PciController<MockPorts>, MockPorts) {
        let ports = MockPorts::new();
        ports.on_pci_read(config_space);
        (PciController::new(ports.clone()), ports)
    }

    #[test]
    fn address_layout() {
        assert_eq!(config_address(0, 0, 0, 0), 0x8000_0000);
        assert_eq!(config_address(1, 2, 3, 0x3E), 0x8001_133C);
    }

    #[test]
    fn sub_dword_reads_are_shifted() {
        let (mut pci, ports) = controller();
        assert_eq!(pci.read(0, 1, 0, 0x02) as u16, 0x7000);
        assert_eq!(pci.read(0, 1, 1, 0x0B) as u8, 0x01);
        assert_eq!(ports.writes_to(CONFIG_ADDRESS).last(), Some(&0x8000_0908));
    }

    #[test]
    fn enumeration_follows_multifunction_bit() {
        let (mut pci, _) = controller();
        pci.activate().unwrap();
        let found: Vec<(u8, u8, u16)> = pci
            .devices()
            .iter()
            .map(|d| (d.device, d.function, d.device_id))
            .collect();
        assert_eq!(found, vec![(0, 0, 0x1237), (1, 0, 0x7000), (1, 1, 0x7010)]);

        let ide = pci.devices()[2];
        assert_eq!((ide.class_id, ide.subclass_id, ide.interface_id), (0x01, 0x01, 0x80));
        assert_eq!(ide.interrupt, 14);
    }

    #[test]
    fn bars_decode_io_and_memory() {
        let (mut pci, _) = controller();
        assert_eq!(pci.bar(0, 1, 1, 4), Some(BaseAddressRegister::Io { port: 0xC000 }));
        assert_eq!(
            pci.bar(0, 1, 1, 5),
            Some(BaseAddressRegister::Memory {
                address: 0xFEB0_0000,
                prefetchable: true,
                kind: BarKind::Bits64,
            })
        );
        assert_eq!(pci.bar(0, 1, 1, 6), None);
    }

    #[test]
    fn writes_go_through_the_data_port() {
        let (mut pci, ports) = controller();
        pci.write(0, 1, 1, 0x04, 0x0000_0007);
        assert_eq!(ports.writes_to(CONFIG_DATA), vec![0x7]);
        assert_eq!(ports.writes_to(CONFIG_ADDRESS), vec![0x8000_0904]);
    }
}
