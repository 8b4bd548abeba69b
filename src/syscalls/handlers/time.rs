//! # Time System Call Handlers
//!
//! Time is counted in timer ticks; `timer_hz` of them make a second.

use crate::interrupts::timer;
use crate::syscalls::dispatcher::SyscallResult;

pub fn sys_get_ticks() -> SyscallResult {
    Ok(timer::ticks())
}
