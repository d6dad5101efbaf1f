//! SVC Entry Glue
//!
//! The synchronous exception handler routes EC == 0x15 here. One
//! global handler slot dispatches every supervisor call; the kernel
//! installs the syscall dispatcher at init. An empty slot answers
//! `-EINVSYSCALL`.

use core::sync::atomic::{AtomicPtr, Ordering};

use vesper_arch::InterruptFrame;
use vesper_common::Status;

/// Supervisor call handler: number, arguments x1..x4, and the frame
/// (for handlers that rewrite the interrupted context).
pub type SvcHandler = fn(num: u64, args: [u64; 4], frame: &mut InterruptFrame) -> i64;

static SVC_HANDLER: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Install the global SVC handler.
pub fn install(handler: SvcHandler) {
    SVC_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Handle an SVC exception: decode number and arguments from the
/// frame, run the handler, store the result in the caller's x0.
pub fn handle(frame: &mut InterruptFrame) {
    let num = frame.gpr[0];
    let args = [frame.gpr[1], frame.gpr[2], frame.gpr[3], frame.gpr[4]];

    let ptr = SVC_HANDLER.load(Ordering::Acquire);
    if ptr.is_null() {
        frame.gpr[0] = Status::InvSyscall.errno() as u64;
        return;
    }

    // SAFETY: only SvcHandler values are stored by install().
    let handler: SvcHandler = unsafe { core::mem::transmute(ptr) };
    let result = handler(num, args, frame);
    frame.gpr[0] = result as u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(num: u64, args: [u64; 4], _frame: &mut InterruptFrame) -> i64 {
        (num + args[0] + args[1] + args[2] + args[3]) as i64
    }

    #[test]
    fn result_lands_in_x0() {
        install(echo);
        let mut frame = InterruptFrame::zeroed();
        frame.gpr[0] = 10;
        frame.gpr[1] = 1;
        frame.gpr[2] = 2;
        frame.gpr[3] = 3;
        frame.gpr[4] = 4;
        handle(&mut frame);
        assert_eq!(frame.gpr[0], 20);
    }
}
