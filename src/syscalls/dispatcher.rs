use core::fmt;

use crate::interrupts::TrapFrame;
use crate::syscalls::handlers;
use crate::syscalls::numbers::SyscallNumber;
use crate::syscalls::Console;
use crate::task::{SchedulerError, TaskScheduler};

/// Success value for `rax`, or the error whose errno goes there instead.
pub type SyscallResult = Result<u64, SyscallError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    PermissionDenied,
    NoSuchTask,
    InvalidArgument,
    NoMemory,
    NotImplemented,
}

impl SyscallError {
    pub fn as_errno(self) -> i64 {
        match self {
            Self::PermissionDenied => -1, // EPERM
            Self::NoSuchTask => -3,       // ESRCH
            Self::NoMemory => -12,        // ENOMEM
            Self::InvalidArgument => -22, // EINVAL
            Self::NotImplemented => -38,  // ENOSYS
        }
    }

    /// Inverse of [`as_errno`](Self::as_errno) for callers of the gate.
    /// Anything unrecognised reads as `NotImplemented`.
    pub fn from_errno(errno: i64) -> Self {
        match errno {
            -1 => Self::PermissionDenied,
            -3 => Self::NoSuchTask,
            -12 => Self::NoMemory,
            -22 => Self::InvalidArgument,
            _ => Self::NotImplemented,
        }
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            Self::PermissionDenied => "operation not permitted",
            Self::NoSuchTask => "no such task",
            Self::InvalidArgument => "invalid argument",
            Self::NoMemory => "out of memory",
            Self::NotImplemented => "function not implemented",
        };
        f.write_str(text)
    }
}

impl From<SchedulerError> for SyscallError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::OutOfMemory | SchedulerError::StackTooSmall(_) => Self::NoMemory,
            SchedulerError::NoSuchTask(_) => Self::NoSuchTask,
            SchedulerError::InvalidTransition(..) => Self::InvalidArgument,
            SchedulerError::IdleCannotExit => Self::PermissionDenied,
        }
    }
}

/// Registers of one gate crossing.
///
/// ```text
///   rax = syscall number   (result / -errno on return)
///   rbx = arg0
///   rcx = arg1
///   rdx = arg2
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SyscallContext {
    pub syscall_num: u64,
    pub arg0: u64,
    pub arg1: u64,
    pub arg2: u64,
}

impl SyscallContext {
    pub fn from_frame(frame: &TrapFrame) -> Self {
        Self {
            syscall_num: frame.rax,
            arg0: frame.rbx,
            arg1: frame.rcx,
            arg2: frame.rdx,
        }
    }
}

pub fn dispatch_syscall(
    ctx: SyscallContext,
    scheduler: &mut TaskScheduler,
    console: &mut dyn Console,
) -> SyscallResult {
    let syscall = SyscallNumber::from(ctx.syscall_num);
    log::trace!(
        "syscall: {:?}({:#x}, {:#x}, {:#x})",
        syscall,
        ctx.arg0,
        ctx.arg1,
        ctx.arg2
    );

    match syscall {
        SyscallNumber::Exit => handlers::process::sys_exit(scheduler, ctx.arg0 as i32),
        SyscallNumber::GetPid => handlers::process::sys_getpid(scheduler),
        SyscallNumber::Yield => handlers::process::sys_yield(scheduler),
        SyscallNumber::Block => handlers::process::sys_block(scheduler),
        SyscallNumber::Unblock => handlers::process::sys_unblock(scheduler, ctx.arg0),

        SyscallNumber::Write => {
            handlers::io::sys_write(console, ctx.arg0 as *const u8, ctx.arg1 as usize)
        }

        SyscallNumber::GetTicks => handlers::time::sys_get_ticks(),

        SyscallNumber::Unknown => {
            log::debug!("syscall: unknown number {}", ctx.syscall_num);
            Err(SyscallError::NotImplemented)
        }
    }
}
