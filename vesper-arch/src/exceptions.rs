//! Exception Vectors and Entry
//!
//! The 2 KiB-aligned vector table `vector_table` has sixteen 128-byte
//! slots in architectural order: for each of {current EL with SP_EL0,
//! current EL with SP_ELx, lower EL AArch64, lower EL AArch32} the four
//! entries {Synchronous, IRQ, FIQ, SError}.
//!
//! Synchronous and IRQ slots save an [`InterruptFrame`] on the kernel
//! stack and hand it to a registered Rust handler; on return the frame
//! (possibly modified — syscalls write their result into x0) is restored
//! and the slot `ERET`s. FIQ, SError and AArch32 entries are never
//! expected in this configuration and halt through a panic.
//!
//! # Frame layout
//!
//! The frame layout is shared verbatim between the assembly stubs and
//! Rust. The stubs use these byte offsets, pinned by const assertions:
//!
//! | offset | field |
//! |--------|-------|
//! | 0..248 | x0..x30 |
//! | 248 | sp (SP_EL0 if from EL0t, else the pre-exception SP) |
//! | 256 | elr_el1 |
//! | 264 | spsr_el1 |
//!
//! Each stub reserves 544 bytes of stack: the 272-byte frame plus slack,
//! keeping SP 16-byte aligned.

use core::sync::atomic::{AtomicPtr, Ordering};

use crate::registers::{esr, read_esr_el1, read_far_el1, spsr};

/// Architectural state captured on exception entry.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct InterruptFrame {
    /// General purpose registers x0..x30.
    pub gpr: [u64; 31],
    /// SP_EL0 when the exception came from EL0t, otherwise the
    /// pre-exception stack pointer.
    pub sp: u64,
    /// Exception return address.
    pub elr_el1: u64,
    /// Saved program status.
    pub spsr_el1: u64,
}

impl InterruptFrame {
    /// A zeroed frame.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            gpr: [0; 31],
            sp: 0,
            elr_el1: 0,
            spsr_el1: 0,
        }
    }

    /// True if the exception was taken from EL0.
    #[must_use]
    pub fn from_el0(&self) -> bool {
        spsr::is_el0t(self.spsr_el1)
    }
}

/// Byte offset of the saved stack pointer.
pub const FRAME_SP_OFFSET: usize = 248;
/// Byte offset of the saved ELR_EL1.
pub const FRAME_ELR_OFFSET: usize = 256;
/// Byte offset of the saved SPSR_EL1.
pub const FRAME_SPSR_OFFSET: usize = 264;
/// Total frame size.
pub const FRAME_SIZE: usize = 272;
/// Stack space each entry stub reserves (frame plus slack).
pub const FRAME_STACK_RESERVE: usize = 544;

// The entry stubs below hardcode these offsets; a layout change here is
// a cross-cutting change there.
const _: () = {
    assert!(core::mem::offset_of!(InterruptFrame, gpr) == 0);
    assert!(core::mem::offset_of!(InterruptFrame, sp) == FRAME_SP_OFFSET);
    assert!(core::mem::offset_of!(InterruptFrame, elr_el1) == FRAME_ELR_OFFSET);
    assert!(core::mem::offset_of!(InterruptFrame, spsr_el1) == FRAME_SPSR_OFFSET);
    assert!(core::mem::size_of::<InterruptFrame>() == FRAME_SIZE);
    assert!(FRAME_STACK_RESERVE >= FRAME_SIZE);
    assert!(FRAME_STACK_RESERVE % 16 == 0);
};

/// Exception handler function type.
pub type ExceptionHandler = fn(&mut InterruptFrame);

static SYNC_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_sync_handler as *mut ());
static IRQ_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_irq_handler as *mut ());
static FIQ_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_fiq_handler as *mut ());
static SERROR_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_serror_handler as *mut ());

/// Install the synchronous exception handler.
pub fn set_sync_handler(handler: ExceptionHandler) {
    SYNC_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Install the IRQ handler.
pub fn set_irq_handler(handler: ExceptionHandler) {
    IRQ_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Install the FIQ handler.
pub fn set_fiq_handler(handler: ExceptionHandler) {
    FIQ_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Install the SError handler.
pub fn set_serror_handler(handler: ExceptionHandler) {
    SERROR_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Load a handler slot.
///
/// # Safety
/// The slot must have been stored by one of the `set_*_handler`
/// functions (or hold its default).
#[inline]
unsafe fn load_handler(slot: &AtomicPtr<()>) -> ExceptionHandler {
    let ptr = slot.load(Ordering::Acquire);
    // SAFETY: only valid function pointers are ever stored.
    unsafe { core::mem::transmute(ptr) }
}

fn default_sync_handler(frame: &mut InterruptFrame) {
    let esr = read_esr_el1();
    panic!(
        "Unhandled synchronous exception: {} (ESR={:#x}, ELR={:#x}, FAR={:#x})",
        esr::ec_name(esr::exception_class(esr)),
        esr,
        frame.elr_el1,
        read_far_el1()
    );
}

fn default_irq_handler(_frame: &mut InterruptFrame) {
    panic!("Unhandled IRQ");
}

fn default_fiq_handler(_frame: &mut InterruptFrame) {
    panic!("Unhandled FIQ");
}

fn default_serror_handler(frame: &mut InterruptFrame) {
    panic!(
        "SError at ELR={:#x} (ESR={:#x})",
        frame.elr_el1,
        read_esr_el1()
    );
}

/// Rust landing pads reached from the continuation stubs.
#[unsafe(no_mangle)]
extern "C" fn handle_sync(frame: &mut InterruptFrame) {
    // SAFETY: stored by set_sync_handler or the default.
    let handler = unsafe { load_handler(&SYNC_HANDLER) };
    handler(frame);
}

#[unsafe(no_mangle)]
extern "C" fn handle_irq(frame: &mut InterruptFrame) {
    // SAFETY: stored by set_irq_handler or the default.
    let handler = unsafe { load_handler(&IRQ_HANDLER) };
    handler(frame);
}

#[unsafe(no_mangle)]
extern "C" fn handle_fiq(frame: &mut InterruptFrame) {
    // SAFETY: stored by set_fiq_handler or the default.
    let handler = unsafe { load_handler(&FIQ_HANDLER) };
    handler(frame);
}

#[unsafe(no_mangle)]
extern "C" fn handle_serror(frame: &mut InterruptFrame) {
    // SAFETY: stored by set_serror_handler or the default.
    let handler = unsafe { load_handler(&SERROR_HANDLER) };
    handler(frame);
}

#[unsafe(no_mangle)]
extern "C" fn handle_aarch32(_frame: &mut InterruptFrame) {
    panic!("AArch32 exception taken; AArch32 is not supported");
}

#[cfg(target_arch = "aarch64")]
mod vectors {
    use core::arch::naked_asm;

    /// Entry stub: save a full interrupt frame and branch to the named
    /// continuation. Must fit a 128-byte vector slot (27 instructions).
    macro_rules! exception_stub {
        ($continuation:ident) => {
            concat!(
                "sub sp, sp, #544\n",
                "stp x0, x1, [sp, #(0 * 16)]\n",
                "stp x2, x3, [sp, #(1 * 16)]\n",
                "stp x4, x5, [sp, #(2 * 16)]\n",
                "stp x6, x7, [sp, #(3 * 16)]\n",
                "stp x8, x9, [sp, #(4 * 16)]\n",
                "stp x10, x11, [sp, #(5 * 16)]\n",
                "stp x12, x13, [sp, #(6 * 16)]\n",
                "stp x14, x15, [sp, #(7 * 16)]\n",
                "stp x16, x17, [sp, #(8 * 16)]\n",
                "stp x18, x19, [sp, #(9 * 16)]\n",
                "stp x20, x21, [sp, #(10 * 16)]\n",
                "stp x22, x23, [sp, #(11 * 16)]\n",
                "stp x24, x25, [sp, #(12 * 16)]\n",
                "stp x26, x27, [sp, #(13 * 16)]\n",
                "stp x28, x29, [sp, #(14 * 16)]\n",
                "str x30, [sp, #240]\n",
                // sp slot: SP_EL0 for EL0t frames (SPSR.M[3:0] == 0),
                // otherwise the pre-exception kernel SP.
                "mrs x0, spsr_el1\n",
                "mrs x1, elr_el1\n",
                "and x2, x0, #0xF\n",
                "cbnz x2, 1f\n",
                "mrs x3, sp_el0\n",
                "b 2f\n",
                "1:\n",
                "add x3, sp, #544\n",
                "2:\n",
                "str x3, [sp, #248]\n",
                "stp x1, x0, [sp, #256]\n",
                "b ",
                stringify!($continuation),
                "\n",
            )
        };
    }

    /// Continuation: call the Rust handler with the frame pointer, then
    /// restore the (possibly modified) frame and return from the
    /// exception.
    macro_rules! exception_continuation {
        ($handler:ident) => {
            concat!(
                "mov x0, sp\n",
                "bl ",
                stringify!($handler),
                "\n",
                "ldp x1, x0, [sp, #256]\n",
                "msr elr_el1, x1\n",
                "msr spsr_el1, x0\n",
                "and x2, x0, #0xF\n",
                "cbnz x2, 1f\n",
                "ldr x3, [sp, #248]\n",
                "msr sp_el0, x3\n",
                "1:\n",
                "ldp x0, x1, [sp, #(0 * 16)]\n",
                "ldp x2, x3, [sp, #(1 * 16)]\n",
                "ldp x4, x5, [sp, #(2 * 16)]\n",
                "ldp x6, x7, [sp, #(3 * 16)]\n",
                "ldp x8, x9, [sp, #(4 * 16)]\n",
                "ldp x10, x11, [sp, #(5 * 16)]\n",
                "ldp x12, x13, [sp, #(6 * 16)]\n",
                "ldp x14, x15, [sp, #(7 * 16)]\n",
                "ldp x16, x17, [sp, #(8 * 16)]\n",
                "ldp x18, x19, [sp, #(9 * 16)]\n",
                "ldp x20, x21, [sp, #(10 * 16)]\n",
                "ldp x22, x23, [sp, #(11 * 16)]\n",
                "ldp x24, x25, [sp, #(12 * 16)]\n",
                "ldp x26, x27, [sp, #(13 * 16)]\n",
                "ldp x28, x29, [sp, #(14 * 16)]\n",
                "ldr x30, [sp, #240]\n",
                "add sp, sp, #544\n",
                "eret\n",
            )
        };
    }

    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    unsafe extern "C" fn __exc_sync_cont() {
        naked_asm!(exception_continuation!(handle_sync));
    }

    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    unsafe extern "C" fn __exc_irq_cont() {
        naked_asm!(exception_continuation!(handle_irq));
    }

    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    unsafe extern "C" fn __exc_fiq_cont() {
        naked_asm!(exception_continuation!(handle_fiq));
    }

    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    unsafe extern "C" fn __exc_serror_cont() {
        naked_asm!(exception_continuation!(handle_serror));
    }

    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    unsafe extern "C" fn __exc_a32_cont() {
        naked_asm!(exception_continuation!(handle_aarch32));
    }

    /// The exception vector table. 2 KiB aligned; sixteen 128-byte
    /// slots. The linker script places `.vector` at a 2 KiB boundary so
    /// the leading `.balign` inserts no padding before the symbol.
    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    #[unsafe(link_section = ".vector")]
    pub unsafe extern "C" fn vector_table() {
        naked_asm!(
            ".balign 2048",
            // Current EL with SP_EL0: the kernel runs EL1h, these
            // cannot be taken.
            ".balign 128",
            "b .",
            ".balign 128",
            "b .",
            ".balign 128",
            "b .",
            ".balign 128",
            "b .",
            // Current EL with SP_ELx.
            ".balign 128",
            exception_stub!(__exc_sync_cont),
            ".balign 128",
            exception_stub!(__exc_irq_cont),
            ".balign 128",
            exception_stub!(__exc_fiq_cont),
            ".balign 128",
            exception_stub!(__exc_serror_cont),
            // Lower EL, AArch64.
            ".balign 128",
            exception_stub!(__exc_sync_cont),
            ".balign 128",
            exception_stub!(__exc_irq_cont),
            ".balign 128",
            exception_stub!(__exc_fiq_cont),
            ".balign 128",
            exception_stub!(__exc_serror_cont),
            // Lower EL, AArch32.
            ".balign 128",
            exception_stub!(__exc_a32_cont),
            ".balign 128",
            exception_stub!(__exc_a32_cont),
            ".balign 128",
            exception_stub!(__exc_a32_cont),
            ".balign 128",
            exception_stub!(__exc_a32_cont),
        );
    }
}

/// Install `vector_table` into VBAR_EL1.
#[cfg(target_arch = "aarch64")]
pub fn install() {
    crate::registers::write_vbar_el1(vectors::vector_table as *const () as u64);
    crate::cpu::isb();
}

/// Address currently programmed into VBAR_EL1.
#[must_use]
pub fn vector_table_address() -> u64 {
    crate::registers::read_vbar_el1()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_matches_the_stub_offsets() {
        assert_eq!(core::mem::offset_of!(InterruptFrame, sp), 248);
        assert_eq!(core::mem::offset_of!(InterruptFrame, elr_el1), 256);
        assert_eq!(core::mem::offset_of!(InterruptFrame, spsr_el1), 264);
        assert_eq!(core::mem::size_of::<InterruptFrame>(), 272);
    }

    #[test]
    fn el0_detection_follows_the_mode_bits() {
        let mut frame = InterruptFrame::zeroed();
        assert!(frame.from_el0());
        frame.spsr_el1 = crate::registers::spsr::MODE_EL1H;
        assert!(!frame.from_el0());
    }
}
