//! # System Call Handlers
//!
//! - `io`: console output
//! - `process`: exit, pid, yield, block/unblock
//! - `time`: tick counter
//!
//! ## Handler Signature
//!
//! Each handler takes the pieces of kernel state it needs plus decoded
//! arguments, and returns a result for `rax`:
//! ```ignore
//! fn sys_write(console: &mut dyn Console, buf: *const u8, count: usize) -> SyscallResult
//! ```

pub mod io;
pub mod process;
pub mod time;
