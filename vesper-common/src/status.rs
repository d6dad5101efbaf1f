//! Kernel Status Codes
//!
//! Every fallible kernel operation returns `Result<T, Status>`. At the
//! syscall boundary a `Status` is encoded as a negative integer in x0;
//! successful results are zero or positive.

/// Kernel error codes.
///
/// The discriminants are the wire values: a failed syscall returns the
/// negated discriminant to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum Status {
    /// Invalid argument
    InvArg = 2,
    /// Out of memory
    NoMem = 3,
    /// Invalid value
    Inval = 6,
    /// Subsystem not initialised
    NotReady = 7,
    /// Invalid address or corrupted state
    Fault = 8,
    /// Resource already in use
    InUse = 10,
    /// No runnable task
    NoTask = 11,
    /// Process or allocation slot table exhausted
    ProcessMax = 12,
    /// Unknown system call number
    InvSyscall = 13,
    /// System call failed internally
    Syscall = 14,
    /// No such entry
    NoEnt = 15,
}

impl Status {
    /// Encode as the negative errno-style value returned through x0.
    #[must_use]
    pub const fn errno(self) -> i64 {
        -(self as i64)
    }

    /// Human-readable name for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Status::InvArg => "invalid argument",
            Status::NoMem => "out of memory",
            Status::Inval => "invalid value",
            Status::NotReady => "not ready",
            Status::Fault => "fault",
            Status::InUse => "in use",
            Status::NoTask => "no runnable task",
            Status::ProcessMax => "table exhausted",
            Status::InvSyscall => "invalid syscall",
            Status::Syscall => "syscall failed",
            Status::NoEnt => "no such entry",
        }
    }
}

/// Shorthand for kernel results.
pub type KernelResult<T> = Result<T, Status>;

/// Encode a kernel result as the integer written into the caller's x0.
#[must_use]
pub fn to_errno(result: KernelResult<i64>) -> i64 {
    match result {
        Ok(v) => v,
        Err(s) => s.errno(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_match_wire_protocol() {
        assert_eq!(Status::InvArg.errno(), -2);
        assert_eq!(Status::NoMem.errno(), -3);
        assert_eq!(Status::Inval.errno(), -6);
        assert_eq!(Status::NotReady.errno(), -7);
        assert_eq!(Status::Fault.errno(), -8);
        assert_eq!(Status::InUse.errno(), -10);
        assert_eq!(Status::NoTask.errno(), -11);
        assert_eq!(Status::ProcessMax.errno(), -12);
        assert_eq!(Status::InvSyscall.errno(), -13);
        assert_eq!(Status::Syscall.errno(), -14);
        assert_eq!(Status::NoEnt.errno(), -15);
    }

    #[test]
    fn to_errno_passes_positive_results_through() {
        assert_eq!(to_errno(Ok(0)), 0);
        assert_eq!(to_errno(Ok(0x4000_0000)), 0x4000_0000);
        assert_eq!(to_errno(Err(Status::InvSyscall)), -13);
    }
}
