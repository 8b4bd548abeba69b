//! # I/O System Call Handlers
//!
//! There are no file descriptors; `Write` always goes to the console.

use crate::syscalls::dispatcher::{SyscallError, SyscallResult};
use crate::syscalls::Console;

/// Largest single write accepted.
pub const MAX_WRITE: usize = 4096;

/// Writes `count` bytes of UTF-8 at `buf` to the console.
pub fn sys_write(console: &mut dyn Console, buf: *const u8, count: usize) -> SyscallResult {
    if count == 0 {
        return Ok(0);
    }
    if buf.is_null() || count > MAX_WRITE {
        return Err(SyscallError::InvalidArgument);
    }

    // Safety: single address space, so the caller's pointer is ours too.
    // Null and oversized requests were rejected above.
    let bytes = unsafe { core::slice::from_raw_parts(buf, count) };
    let text = core::str::from_utf8(bytes).map_err(|_| SyscallError::InvalidArgument)?;
    console.write_str(text);
    Ok(count as u64)
}
