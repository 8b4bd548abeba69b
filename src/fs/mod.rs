//! On-disk structures the kernel understands. Only the MBR partition table
//! for now; filesystems proper live with the emulator.

pub mod msdos;

pub use msdos::{read_partitions, BootFlag, BootSector, PartitionEntry, PartitionError};
