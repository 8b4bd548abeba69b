//! ATA PIO, 28-bit LBA, one sector per command.
//!
//! ## Register Map (command block at `base`)
//!
//! | Offset | Read        | Write        |
//! |--------|-------------|--------------|
//! | +0     | data (u16)  | data (u16)   |
//! | +1     | error       | features     |
//! | +2     | sector count                |
//! | +3..5  | LBA low / mid / high        |
//! | +6     | drive / head                |
//! | +7     | status      | command      |
//!
//! The control block (`base + 0x206`) holds device control. Every wait is
//! a bounded status poll; there is no DMA.

use core::fmt;

use crate::drivers::{Driver, DriverError};
use crate::hal::{PortIo, PortRange};
use crate::interrupts::{InterruptHandler, Resume, TrapFrame};

pub const SECTOR_SIZE: usize = 512;
pub const PRIMARY_IRQ: u8 = 14;

const REG_DATA: u16 = 0;
const REG_ERROR: u16 = 1;
const REG_SECTOR_COUNT: u16 = 2;
const REG_LBA_LOW: u16 = 3;
const REG_LBA_MID: u16 = 4;
const REG_LBA_HIGH: u16 = 5;
const REG_DEVICE: u16 = 6;
const REG_STATUS: u16 = 7;
const CONTROL_OFFSET: u16 = 0x206;

const STATUS_BSY: u8 = 0x80;
const STATUS_DRQ: u8 = 0x08;
const STATUS_ERR: u8 = 0x01;
/// Nothing drives the bus.
const STATUS_FLOATING: u8 = 0xFF;

const CMD_READ_PIO: u8 = 0x20;
const CMD_WRITE_PIO: u8 = 0x30;
const CMD_CACHE_FLUSH: u8 = 0xE7;
const CMD_IDENTIFY: u8 = 0xEC;

const LBA28_LIMIT: u32 = 0x1000_0000;
const MAX_POLLS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    NoDevice,
    Timeout,
    /// ERR was set; carries the error register.
    DeviceError(u8),
    LbaOutOfRange(u32),
    BufferTooLarge(usize),
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoDevice => f.write_str("no drive"),
            Self::Timeout => f.write_str("drive timed out"),
            Self::DeviceError(err) => write!(f, "drive error {:#04x}", err),
            Self::LbaOutOfRange(lba) => write!(f, "LBA {:#x} does not fit in 28 bits", lba),
            Self::BufferTooLarge(len) => {
                write!(f, "{} bytes requested, one sector is {}", len, SECTOR_SIZE)
            }
        }
    }
}

impl From<DiskError> for DriverError {
    fn from(err: DiskError) -> Self {
        match err {
            DiskError::NoDevice => DriverError::NoDevice,
            DiskError::Timeout => DriverError::Timeout,
            DiskError::DeviceError(code) => DriverError::DeviceError(code),
            DiskError::LbaOutOfRange(_) | DiskError::BufferTooLarge(_) => DriverError::DeviceError(0),
        }
    }
}

/// Synchronous sector access. Buffers up to one sector; shorter writes are
/// zero-padded, shorter reads discard the rest of the sector.
pub trait BlockDevice {
    fn read(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), DiskError>;
    fn write(&mut self, lba: u32, data: &[u8]) -> Result<(), DiskError>;
    fn flush(&mut self) -> Result<(), DiskError>;
}

/// The parts of IDENTIFY DEVICE the kernel looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveInfo {
    model: [u8; 40],
    pub lba28_sectors: u32,
}

impl DriveInfo {
    pub fn model(&self) -> &str {
        core::str::from_utf8(&self.model)
            .unwrap_or("?")
            .trim_matches(|c: char| c == ' ' || c == '\0')
    }
}

pub struct AtaDriver<P: PortIo> {
    ports: P,
    base: u16,
    master: bool,
    ranges: [PortRange; 2],
    info: Option<DriveInfo>,
    last_status: u8,
}

impl<P: PortIo> AtaDriver<P> {
    pub fn new(ports: P, base: u16, master: bool) -> Self {
        Self {
            ports,
            base,
            master,
            ranges: [PortRange::new(base, 8), PortRange::single(base + CONTROL_OFFSET)],
            info: None,
            last_status: 0,
        }
    }

    pub fn info(&self) -> Option<&DriveInfo> {
        self.info.as_ref()
    }

    /// Status seen by the last interrupt.
    pub fn last_status(&self) -> u8 {
        self.last_status
    }

    fn reg(&self, offset: u16) -> u16 {
        self.base + offset
    }

    fn select(&mut self, lba_flags: u8) {
        let drive = if self.master { 0x00 } else { 0x10 };
        self.ports.write_u8(self.reg(REG_DEVICE), lba_flags | drive);
    }

    /// Waits for BSY to clear, then reports ERR.
    fn wait_ready(&mut self) -> Result<u8, DiskError> {
        for _ in 0..MAX_POLLS {
            let status = self.ports.read_u8(self.reg(REG_STATUS));
            if status & STATUS_BSY != 0 {
                continue;
            }
            if status & STATUS_ERR != 0 {
                return Err(DiskError::DeviceError(self.ports.read_u8(self.reg(REG_ERROR))));
            }
            return Ok(status);
        }
        Err(DiskError::Timeout)
    }

    fn wait_data(&mut self) -> Result<(), DiskError> {
        let status = self.wait_ready()?;
        if status & STATUS_DRQ == 0 {
            return Err(DiskError::DeviceError(0));
        }
        Ok(())
    }

    pub fn identify(&mut self) -> Result<DriveInfo, DiskError> {
        self.select(0xA0);
        self.ports.write_u8(self.base + CONTROL_OFFSET, 0);

        if self.ports.read_u8(self.reg(REG_STATUS)) == STATUS_FLOATING {
            return Err(DiskError::NoDevice);
        }

        self.select(0xA0);
        for reg in [REG_SECTOR_COUNT, REG_LBA_LOW, REG_LBA_MID, REG_LBA_HIGH] {
            self.ports.write_u8(self.reg(reg), 0);
        }
        self.ports.write_u8(self.reg(REG_STATUS), CMD_IDENTIFY);

        if self.ports.read_u8(self.reg(REG_STATUS)) == 0 {
            return Err(DiskError::NoDevice);
        }
        self.wait_data()?;

        let mut words = [0u16; 256];
        for word in words.iter_mut() {
            *word = self.ports.read_u16(self.reg(REG_DATA));
        }

        // Model string: words 27..47, each word big-endian.
        let mut model = [0u8; 40];
        for (i, word) in words[27..47].iter().enumerate() {
            model[2 * i] = (word >> 8) as u8;
            model[2 * i + 1] = *word as u8;
        }
        let info = DriveInfo {
            model,
            lba28_sectors: u32::from(words[60]) | u32::from(words[61]) << 16,
        };
        self.info = Some(info);
        Ok(info)
    }

    fn setup(&mut self, lba: u32, len: usize, command: u8) -> Result<(), DiskError> {
        if lba >= LBA28_LIMIT {
            return Err(DiskError::LbaOutOfRange(lba));
        }
        if len > SECTOR_SIZE {
            return Err(DiskError::BufferTooLarge(len));
        }

        self.select(0xE0 | ((lba >> 24) & 0x0F) as u8);
        self.ports.write_u8(self.reg(REG_ERROR), 0);
        self.ports.write_u8(self.reg(REG_SECTOR_COUNT), 1);
        self.ports.write_u8(self.reg(REG_LBA_LOW), lba as u8);
        self.ports.write_u8(self.reg(REG_LBA_MID), (lba >> 8) as u8);
        self.ports.write_u8(self.reg(REG_LBA_HIGH), (lba >> 16) as u8);
        self.ports.write_u8(self.reg(REG_STATUS), command);
        Ok(())
    }
}

impl<P: PortIo> BlockDevice for AtaDriver<P> {
    fn read(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        self.setup(lba, buf.len(), CMD_READ_PIO)?;
        self.wait_data()?;

        let data = self.reg(REG_DATA);
        for chunk in buf.chunks_mut(2) {
            let [lo, hi] = self.ports.read_u16(data).to_le_bytes();
            chunk[0] = lo;
            if let Some(byte) = chunk.get_mut(1) {
                *byte = hi;
            }
        }
        for _ in buf.len().div_ceil(2)..SECTOR_SIZE / 2 {
            self.ports.read_u16(data);
        }
        Ok(())
    }

    fn write(&mut self, lba: u32, bytes: &[u8]) -> Result<(), DiskError> {
        self.setup(lba, bytes.len(), CMD_WRITE_PIO)?;
        self.wait_data()?;

        let data = self.reg(REG_DATA);
        for chunk in bytes.chunks(2) {
            let word = u16::from_le_bytes([chunk[0], chunk.get(1).copied().unwrap_or(0)]);
            self.ports.write_u16(data, word);
        }
        for _ in bytes.len().div_ceil(2)..SECTOR_SIZE / 2 {
            self.ports.write_u16(data, 0);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DiskError> {
        self.select(0xE0);
        self.ports.write_u8(self.reg(REG_STATUS), CMD_CACHE_FLUSH);
        if self.ports.read_u8(self.reg(REG_STATUS)) == 0 {
            return Err(DiskError::NoDevice);
        }
        self.wait_ready().map(|_| ())
    }
}

impl<P: PortIo> Driver for AtaDriver<P> {
    fn name(&self) -> &'static str {
        if self.master {
            "ata-master"
        } else {
            "ata-slave"
        }
    }

    fn activate(&mut self) -> Result<(), DriverError> {
        let info = self.identify()?;
        log::info!(
            "ata: {:#x} {}: '{}', {} sectors",
            self.base,
            if self.master { "master" } else { "slave" },
            info.model(),
            info.lba28_sectors
        );
        Ok(())
    }

    fn ports(&self) -> &[PortRange] {
        &self.ranges
    }
}

impl<P: PortIo> InterruptHandler for AtaDriver<P> {
    fn handle_interrupt(&mut self, _frame: &mut TrapFrame) -> Resume {
        // Reading status deasserts the drive's interrupt.
        self.last_status = self.ports.read_u8(self.reg(REG_STATUS));
        Resume::Interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockPorts;

    const BASE: u16 = 0x1F0;
    const STATUS: u16 = BASE + 7;
    const DATA: u16 = BASE;

    fn drive() -> (AtaDriver<MockPorts>, MockPorts) {
        let ports = MockPorts::new();
        ports.set(STATUS, 0x58);
        (AtaDriver::new(ports.clone(), BASE, true), ports)
    }

    #[test]
    fn identify_reads_model_and_size() {
        let (mut ata, ports) = drive();
        let mut words = [0u32; 256];
        let model = format!("{:<40}", "QEMU HARDDISK");
        for (i, pair) in model.as_bytes().chunks(2).enumerate() {
            words[27 + i] = u32::from(pair[0]) << 8 | u32::from(pair[1]);
        }
        words[60] = 0x0000;
        words[61] = 0x0002;
        for w in words {
            ports.push(DATA, w);
        }

        ata.activate().unwrap();
        let info = ata.info().unwrap();
        assert_eq!(info.model(), "QEMU HARDDISK");
        assert_eq!(info.lba28_sectors, 0x2_0000);
        assert!(ports.writes_to(STATUS).contains(&u32::from(CMD_IDENTIFY)));
        assert_eq!(ports.writes_to(BASE + 0x206), vec![0]);
    }

    #[test]
    fn missing_drive_fails_activation() {
        let (mut ata, ports) = drive();
        ports.set(STATUS, 0xFF);
        assert_eq!(ata.activate(), Err(DriverError::NoDevice));

        let (mut ata, ports) = drive();
        ports.set(STATUS, 0x00);
        assert_eq!(ata.identify(), Err(DiskError::NoDevice));
    }

    #[test]
    fn busy_drive_times_out() {
        let (mut ata, ports) = drive();
        ports.set(STATUS, 0x80);
        let mut buf = [0u8; 16];
        assert_eq!(ata.read(0, &mut buf), Err(DiskError::Timeout));
    }

    #[test]
    fn error_bit_reports_error_register() {
        let (mut ata, ports) = drive();
        ports.set(STATUS, 0x51);
        ports.set(BASE + 1, 0x04);
        assert_eq!(ata.flush(), Err(DiskError::DeviceError(0x04)));
    }

    #[test]
    fn read_programs_lba_and_drains_the_sector() {
        let (mut ata, ports) = drive();
        ports.push(DATA, 0x4241);
        ports.push(DATA, 0x0043);

        let mut buf = [0u8; 3];
        ata.read(0x0123_4567, &mut buf).unwrap();
        assert_eq!(&buf, b"ABC");

        assert_eq!(ports.writes_to(BASE + 6), vec![0xE1]);
        assert_eq!(ports.writes_to(BASE + 3), vec![0x67]);
        assert_eq!(ports.writes_to(BASE + 4), vec![0x45]);
        assert_eq!(ports.writes_to(BASE + 5), vec![0x23]);
        assert_eq!(ports.writes_to(STATUS), vec![u32::from(CMD_READ_PIO)]);
        let data_reads = ports
            .log()
            .iter()
            .filter(|a| **a == crate::hal::mock::Access::Read16(DATA))
            .count();
        assert_eq!(data_reads, 256);
    }

    #[test]
    fn write_pads_the_sector_with_zeros() {
        let (mut ata, ports) = drive();
        ata.write(7, b"Hi!").unwrap();
        ata.flush().unwrap();

        let words = ports.writes_to(DATA);
        assert_eq!(words.len(), 256);
        assert_eq!(&words[..2], &[0x6948, 0x0021]);
        assert!(words[2..].iter().all(|w| *w == 0));
        assert_eq!(
            ports.writes_to(STATUS),
            vec![u32::from(CMD_WRITE_PIO), u32::from(CMD_CACHE_FLUSH)]
        );
    }

    #[test]
    fn oversized_or_unaddressable_requests_are_rejected() {
        let (mut ata, ports) = drive();
        let mut big = [0u8; 513];
        assert_eq!(ata.read(0, &mut big), Err(DiskError::BufferTooLarge(513)));
        assert_eq!(ata.write(0x1000_0000, b"x"), Err(DiskError::LbaOutOfRange(0x1000_0000)));
        assert!(ports.log().is_empty());
    }

    #[test]
    fn interrupt_reads_status() {
        let (mut ata, _) = drive();
        ata.handle_interrupt(&mut TrapFrame::default());
        assert_eq!(ata.last_status(), 0x58);
    }
}
