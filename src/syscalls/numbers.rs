//! System call numbers, passed in `rax`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SyscallNumber {
    // Process management
    Exit = 0,
    GetPid = 20,
    Yield = 24,
    /// Parks the caller until another task unblocks it.
    Block = 29,
    /// `arg0` = id of a blocked task.
    Unblock = 37,

    // I/O
    Write = 4,

    // Time
    GetTicks = 61,

    Unknown = u64::MAX,
}

impl From<u64> for SyscallNumber {
    fn from(num: u64) -> Self {
        match num {
            0 => Self::Exit,
            4 => Self::Write,
            20 => Self::GetPid,
            24 => Self::Yield,
            29 => Self::Block,
            37 => Self::Unblock,
            61 => Self::GetTicks,
            _ => Self::Unknown,
        }
    }
}
