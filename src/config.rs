//! Kernel configuration.
//!
//! There is no filesystem to read settings from at boot, so configuration
//! is a `Copy` struct with compile-time defaults. The entry point may tweak
//! fields before handing the struct to the bootstrap sequence.

use core::fmt;

use log::LevelFilter;

/// First vector after the CPU exception range.
pub const FIRST_FREE_VECTOR: u8 = 32;

/// Number of legacy IRQ lines behind the chained 8259 pair.
pub const IRQ_LINES: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Vector that IRQ 0 is remapped to. Lines 1..16 follow contiguously.
    pub irq_base: u8,
    /// The software syscall gate.
    pub syscall_vector: u8,
    /// Size of the static heap region in bytes.
    pub heap_size: usize,
    /// Stack bytes given to every spawned task.
    pub task_stack_size: usize,
    /// PIT channel 0 frequency; one tick is one scheduling quantum.
    pub timer_hz: u32,
    /// Scancode that flips the keyboard router between emulation and monitor.
    pub toggle_key: u8,
    /// Command block base of the primary ATA channel.
    pub ata_io_base: u16,
    pub log_level: LevelFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    IrqRangeOverlapsExceptions,
    SyscallInsideIrqRange,
    IrqRangeOverflow,
    ZeroTimerFrequency,
    HeapTooSmall,
}

impl KernelConfig {
    pub const fn default() -> Self {
        Self {
            irq_base: 0x20,
            syscall_vector: 0x80,
            heap_size: 10 * 1024 * 1024,
            task_stack_size: 16 * 1024,
            timer_hz: 100,
            toggle_key: 0x01,
            ata_io_base: 0x1F0,
            log_level: LevelFilter::Info,
        }
    }

    /// Defaults plus the `EMUDORE_LOG` level baked in at build time.
    pub fn from_build_env() -> Self {
        let mut config = Self::default();
        if let Some(level) = option_env!("EMUDORE_LOG").and_then(|s| s.parse().ok()) {
            config.log_level = level;
        }
        config
    }

    /// Vector that IRQ line `line` is delivered on.
    pub const fn irq_vector(&self, line: u8) -> u8 {
        self.irq_base + line
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.irq_base < FIRST_FREE_VECTOR {
            return Err(ConfigError::IrqRangeOverlapsExceptions);
        }
        let irq_end = u16::from(self.irq_base) + u16::from(IRQ_LINES);
        if irq_end > 256 {
            return Err(ConfigError::IrqRangeOverflow);
        }
        let gate = u16::from(self.syscall_vector);
        if gate >= u16::from(self.irq_base) && gate < irq_end {
            return Err(ConfigError::SyscallInsideIrqRange);
        }
        if self.syscall_vector < FIRST_FREE_VECTOR {
            return Err(ConfigError::IrqRangeOverlapsExceptions);
        }
        if self.timer_hz == 0 {
            return Err(ConfigError::ZeroTimerFrequency);
        }
        if self.heap_size < crate::memory::heap::MIN_REGION_SIZE {
            return Err(ConfigError::HeapTooSmall);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::default()
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IrqRangeOverlapsExceptions => write!(f, "vector range overlaps CPU exceptions"),
            Self::SyscallInsideIrqRange => write!(f, "syscall gate collides with an IRQ vector"),
            Self::IrqRangeOverflow => write!(f, "IRQ range runs past vector 255"),
            Self::ZeroTimerFrequency => write!(f, "timer frequency must be non-zero"),
            Self::HeapTooSmall => write!(f, "heap region cannot hold a single block"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = KernelConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.irq_vector(0), 0x20);
        assert_eq!(config.irq_vector(15), 0x2F);
    }

    #[test]
    fn syscall_gate_never_matches_an_irq_vector() {
        let config = KernelConfig::default();
        assert!((0..IRQ_LINES).all(|line| config.irq_vector(line) != config.syscall_vector));

        let clash = KernelConfig { syscall_vector: 0x25, ..config };
        assert_eq!(clash.validate(), Err(ConfigError::SyscallInsideIrqRange));
    }

    #[test]
    fn rejects_bad_layouts() {
        let config = KernelConfig::default();
        let low = KernelConfig { irq_base: 0x08, ..config };
        assert_eq!(low.validate(), Err(ConfigError::IrqRangeOverlapsExceptions));

        let high = KernelConfig { irq_base: 0xF8, ..config };
        assert_eq!(high.validate(), Err(ConfigError::IrqRangeOverflow));

        let still = KernelConfig { timer_hz: 0, ..config };
        assert_eq!(still.validate(), Err(ConfigError::ZeroTimerFrequency));

        let tiny = KernelConfig { heap_size: 8, ..config };
        assert_eq!(tiny.validate(), Err(ConfigError::HeapTooSmall));
    }
}
