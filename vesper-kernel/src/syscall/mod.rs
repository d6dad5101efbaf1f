//! System Call Dispatch
//!
//! Supervisor calls from EL0 carry the syscall number in x0 and up to
//! four arguments in x1..x4. The dispatcher decodes the number, runs
//! the operation against the calling process and returns the result in
//! x0 — except ProcessExit, which gives up the calling context and
//! schedules the next task instead of returning.

pub mod numbers;
pub mod svc;

pub use numbers::{SYSCALL_MAX, Syscall};

#[cfg(target_arch = "aarch64")]
pub use dispatch::init;

#[cfg(target_arch = "aarch64")]
mod dispatch {
    use super::numbers::Syscall;
    use super::svc;
    use crate::{process, sched};
    use vesper_arch::InterruptFrame;
    use vesper_common::status::to_errno;
    use vesper_common::{KernelResult, Status};
    use vesper_pal::console;

    /// Longest string PrintString will walk looking for the NUL.
    const MAX_PRINT_LEN: usize = 4096;

    /// Install the syscall dispatcher as the SVC handler.
    pub fn init() {
        svc::install(dispatch);
        log::info!("Syscall interface initialised");
    }

    fn dispatch(num: u64, args: [u64; 4], _frame: &mut InterruptFrame) -> i64 {
        let Some(call) = Syscall::from_number(num) else {
            log::warn!("Invalid syscall number {}", num);
            return Status::InvSyscall.errno();
        };

        log::trace!("Syscall {} ({:#x}, {:#x})", call.name(), args[0], args[1]);

        match call {
            Syscall::ProcessExit => {
                let _ = process::terminate_current();
                // The calling context is gone; pick the next task.
                sched::schedule()
            }
            Syscall::ProcessMalloc => {
                // Pointer on success, 0 on failure.
                process::current_malloc(args[0] as usize)
                    .map(|p| p as i64)
                    .unwrap_or(0)
            }
            Syscall::ProcessFree => to_errno(process::current_free(args[0]).map(|()| 0)),
            Syscall::ProcessGetArgs => to_errno(get_args(args[0], args[1]).map(|()| 0)),
            Syscall::PrintChar => {
                console::putc(args[0] as u8);
                0
            }
            Syscall::PrintString => to_errno(print_string(args[0]).map(|()| 0)),
        }
    }

    /// Write argc and argv through caller-supplied pointers. Either
    /// pointer may be null to skip that output; non-null pointers must
    /// lie in the caller's memory.
    fn get_args(argc_ptr: u64, argv_ptr: u64) -> KernelResult<()> {
        let (argc, argv) = process::current_arguments()?;

        if argc_ptr != 0 {
            if !process::current_memory_verify(argc_ptr, core::mem::size_of::<i32>()) {
                return Err(Status::Fault);
            }
            // SAFETY: verified to lie inside the caller's memory.
            unsafe {
                core::ptr::write(argc_ptr as *mut i32, argc);
            }
        }

        if argv_ptr != 0 {
            if !process::current_memory_verify(argv_ptr, core::mem::size_of::<u64>()) {
                return Err(Status::Fault);
            }
            // SAFETY: verified to lie inside the caller's memory.
            unsafe {
                core::ptr::write(argv_ptr as *mut u64, argv);
            }
        }

        Ok(())
    }

    /// Print a NUL-terminated string from caller memory, bounded so a
    /// missing terminator cannot walk the kernel off a cliff.
    fn print_string(ptr: u64) -> KernelResult<()> {
        if ptr == 0 {
            return Err(Status::InvArg);
        }

        for i in 0..MAX_PRINT_LEN as u64 {
            // SAFETY: byte reads from the identity-mapped address the
            // caller handed us; bounded by MAX_PRINT_LEN.
            let byte = unsafe { core::ptr::read_volatile((ptr + i) as *const u8) };
            if byte == 0 {
                return Ok(());
            }
            if byte == b'\n' {
                console::putc(b'\r');
            }
            console::putc(byte);
        }

        Ok(())
    }
}
