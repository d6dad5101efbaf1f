//! System Call Numbers
//!
//! The syscall number travels in x0 of the issuing task; arguments in
//! x1..x4; the result comes back in x0.

/// System calls understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Syscall {
    /// Terminate the calling process. Does not return.
    ProcessExit = 0,
    /// Allocate heap memory for the calling process.
    ProcessMalloc = 1,
    /// Free memory owned by the calling process.
    ProcessFree = 2,
    /// Write argc/argv through caller-supplied pointers.
    ProcessGetArgs = 3,
    /// Write one byte to the console.
    PrintChar = 4,
    /// Write a NUL-terminated string to the console.
    PrintString = 5,
}

/// Number of defined system calls.
pub const SYSCALL_MAX: u64 = 6;

impl Syscall {
    /// Decode a syscall number.
    #[must_use]
    pub const fn from_number(num: u64) -> Option<Self> {
        match num {
            0 => Some(Self::ProcessExit),
            1 => Some(Self::ProcessMalloc),
            2 => Some(Self::ProcessFree),
            3 => Some(Self::ProcessGetArgs),
            4 => Some(Self::PrintChar),
            5 => Some(Self::PrintString),
            _ => None,
        }
    }

    /// Name for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ProcessExit => "ProcessExit",
            Self::ProcessMalloc => "ProcessMalloc",
            Self::ProcessFree => "ProcessFree",
            Self::ProcessGetArgs => "ProcessGetArgs",
            Self::PrintChar => "PrintChar",
            Self::PrintString => "PrintString",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_number_round_trips() {
        for num in 0..SYSCALL_MAX {
            let call = Syscall::from_number(num).expect("defined syscall");
            assert_eq!(call as u64, num);
        }
    }

    #[test]
    fn out_of_range_numbers_are_rejected() {
        assert_eq!(Syscall::from_number(SYSCALL_MAX), None);
        assert_eq!(Syscall::from_number(u64::MAX), None);
    }
}
