//! MS-DOS master boot record.
//!
//! ```text
//! 0x000  bootstrap code
//! 0x1BE  partition entry 1 ┐
//! 0x1CE  partition entry 2 │ 16 bytes each:
//! 0x1DE  partition entry 3 │   +0x00 status  +0x04 type
//! 0x1EE  partition entry 4 ┘   +0x08 first LBA  +0x0C sector count
//! 0x1FE  0x55 0xAA
//! ```

use core::fmt::{self, Write};

use crate::drivers::ata::{BlockDevice, DiskError, SECTOR_SIZE};

const TABLE_OFFSET: usize = 0x1BE;
const ENTRY_SIZE: usize = 16;
const ENTRIES: usize = 4;
const SIGNATURE_OFFSET: usize = 0x1FE;
const SIGNATURE: [u8; 2] = [0x55, 0xAA];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootFlag {
    Bootable,
    NotBootable,
    /// Anything other than 0x80 or 0x00.
    Unspecified(u8),
}

impl From<u8> for BootFlag {
    fn from(status: u8) -> Self {
        match status {
            0x80 => Self::Bootable,
            0x00 => Self::NotBootable,
            other => Self::Unspecified(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    /// 0..4, position in the table.
    pub index: usize,
    pub status: BootFlag,
    pub partition_type: u8,
    pub start_lba: u32,
    pub sector_count: u32,
}

impl PartitionEntry {
    pub fn is_bootable(&self) -> bool {
        self.status == BootFlag::Bootable
    }

    /// Type 0 marks an unused slot.
    pub fn is_used(&self) -> bool {
        self.partition_type != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionError {
    InvalidBootSector,
    Disk(DiskError),
}

impl From<DiskError> for PartitionError {
    fn from(err: DiskError) -> Self {
        Self::Disk(err)
    }
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidBootSector => f.write_str("invalid boot sector signature"),
            Self::Disk(err) => write!(f, "reading the boot sector: {}", err),
        }
    }
}

#[derive(Clone)]
pub struct BootSector {
    raw: [u8; SECTOR_SIZE],
}

impl BootSector {
    pub fn parse(raw: &[u8; SECTOR_SIZE]) -> Self {
        Self { raw: *raw }
    }

    pub fn is_valid(&self) -> bool {
        self.raw[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2] == SIGNATURE
    }

    pub fn entry(&self, index: usize) -> Option<PartitionEntry> {
        (index < ENTRIES).then(|| self.decode(index))
    }

    pub fn entries(&self) -> [PartitionEntry; ENTRIES] {
        core::array::from_fn(|index| self.decode(index))
    }

    fn decode(&self, index: usize) -> PartitionEntry {
        let at = TABLE_OFFSET + index * ENTRY_SIZE;
        let e = &self.raw[at..at + ENTRY_SIZE];
        PartitionEntry {
            index,
            status: BootFlag::from(e[0x00]),
            partition_type: e[0x04],
            start_lba: u32::from_le_bytes([e[0x08], e[0x09], e[0x0A], e[0x0B]]),
            sector_count: u32::from_le_bytes([e[0x0C], e[0x0D], e[0x0E], e[0x0F]]),
        }
    }

    /// Writes the operator-facing partition table.
    pub fn write_report(&self, out: &mut impl Write) -> fmt::Result {
        writeln!(out, "Partition table")?;
        writeln!(out, "----------------------------------------------------------")?;
        writeln!(out, "part # | Bootable | Type |")?;
        writeln!(out, "----------------------------------------------------------")?;
        for entry in self.entries() {
            let flag = match entry.status {
                BootFlag::Bootable => 'Y',
                BootFlag::NotBootable => 'N',
                BootFlag::Unspecified(_) => '?',
            };
            writeln!(
                out,
                "  {:02X}       {}         {:02X}",
                entry.index + 1,
                flag,
                entry.partition_type
            )?;
        }
        Ok(())
    }
}

impl fmt::Debug for BootSector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BootSector")
            .field("valid", &self.is_valid())
            .field("entries", &self.entries())
            .finish()
    }
}

/// Reads LBA 0 of `disk` and checks its signature.
pub fn read_partitions(disk: &mut dyn BlockDevice) -> Result<BootSector, PartitionError> {
    let mut raw = [0u8; SECTOR_SIZE];
    disk.read(0, &mut raw)?;
    let sector = BootSector::parse(&raw);
    if !sector.is_valid() {
        return Err(PartitionError::InvalidBootSector);
    }
    Ok(sector)
}

/// Sends the report for `sector` to the serial console.
pub fn print_report(sector: &BootSector) {
    struct Console;

    impl Write for Console {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            crate::print!("{}", s);
            Ok(())
        }
    }

    let _ = sector.write_report(&mut Console);
}
