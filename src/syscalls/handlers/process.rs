use crate::syscalls::dispatcher::{SyscallError, SyscallResult};
use crate::task::{TaskId, TaskScheduler};

/// Removes the calling task. The gateway switches away before returning.
pub fn sys_exit(scheduler: &mut TaskScheduler, status: i32) -> SyscallResult {
    let id = scheduler.exit_current()?;
    log::info!("task {} exited with status {}", id, status);
    Ok(0)
}

pub fn sys_getpid(scheduler: &mut TaskScheduler) -> SyscallResult {
    Ok(u64::from(scheduler.current_id().0))
}

pub fn sys_yield(scheduler: &mut TaskScheduler) -> SyscallResult {
    scheduler.request_resched();
    Ok(0)
}

/// Blocks the caller. The gateway switches away in the same crossing and
/// the caller sees 0 once it is unblocked and scheduled again.
pub fn sys_block(scheduler: &mut TaskScheduler) -> SyscallResult {
    scheduler.block_current()?;
    Ok(0)
}

pub fn sys_unblock(scheduler: &mut TaskScheduler, id: u64) -> SyscallResult {
    let id = u32::try_from(id).map_err(|_| SyscallError::NoSuchTask)?;
    scheduler.unblock(TaskId(id))?;
    Ok(0)
}
