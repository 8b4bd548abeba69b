//! PIT channel 0 as the scheduling clock.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::hal::PortIo;
use crate::interrupts::{InterruptHandler, Resume, TrapFrame};
use crate::task::TaskScheduler;

pub const PIT_FREQUENCY: u32 = 1_193_182;

const CHANNEL0_DATA: u16 = 0x40;
const COMMAND: u16 = 0x43;
/// Channel 0, lobyte/hibyte, mode 3 (square wave), binary.
const CHANNEL0_SQUARE_WAVE: u8 = 0x36;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Timer interrupts since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Reload value for `hz`, clamped to what the 16-bit counter can hold.
pub fn divisor_for(hz: u32) -> u16 {
    let divisor = PIT_FREQUENCY / hz.max(1);
    divisor.clamp(1, u32::from(u16::MAX)) as u16
}

/// Programs channel 0 to fire IRQ 0 at roughly `hz`. Returns the divisor used.
pub fn program_pit(ports: &mut dyn PortIo, hz: u32) -> u16 {
    let divisor = divisor_for(hz);
    ports.write_u8(COMMAND, CHANNEL0_SQUARE_WAVE);
    ports.write_u8(CHANNEL0_DATA, (divisor & 0xFF) as u8);
    ports.write_u8(CHANNEL0_DATA, (divisor >> 8) as u8);
    log::debug!("timer: PIT divisor {} ({} Hz)", divisor, PIT_FREQUENCY / u32::from(divisor));
    divisor
}

/// IRQ 0 handler: one tick, one scheduling decision.
pub struct TimerTick {
    scheduler: Arc<Mutex<TaskScheduler>>,
}

impl TimerTick {
    pub fn new(scheduler: Arc<Mutex<TaskScheduler>>) -> Self {
        Self { scheduler }
    }
}

impl InterruptHandler for TimerTick {
    fn handle_interrupt(&mut self, frame: &mut TrapFrame) -> Resume {
        TICKS.fetch_add(1, Ordering::Relaxed);
        self.scheduler.lock().schedule(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::gdt::KernelSelectors;
    use crate::hal::mock::MockPorts;

    #[test]
    fn divisor_matches_frequency() {
        assert_eq!(divisor_for(100), 11931);
        assert_eq!(divisor_for(1000), 1193);
        assert_eq!(divisor_for(0), u16::MAX);
        assert_eq!(divisor_for(10), u16::MAX);
        assert_eq!(divisor_for(2_000_000), 1);
    }

    #[test]
    fn programs_channel_zero_low_byte_first() {
        let ports = MockPorts::new();
        let divisor = program_pit(&mut ports.clone(), 100);
        assert_eq!(ports.writes_to(COMMAND), vec![0x36]);
        assert_eq!(
            ports.writes_to(CHANNEL0_DATA),
            vec![u32::from(divisor & 0xFF), u32::from(divisor >> 8)]
        );
    }

    extern "C" fn spin() -> ! {
        unreachable!()
    }

    #[test]
    fn tick_counts_and_reschedules() {
        let selectors = KernelSelectors { code: 0x08, data: 0x10 };
        let scheduler = Arc::new(Mutex::new(TaskScheduler::new(selectors, 4096).unwrap()));
        let worker = scheduler.lock().spawn("worker", spin).unwrap();
        let mut tick = TimerTick::new(scheduler.clone());

        let before = ticks();
        let mut frame = TrapFrame::default();
        assert!(matches!(tick.handle_interrupt(&mut frame), Resume::Switch(_)));
        assert!(ticks() > before);
        assert_eq!(scheduler.lock().current_id(), worker);
    }
}
