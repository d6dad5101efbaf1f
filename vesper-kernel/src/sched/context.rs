//! Context Restore
//!
//! Dispatching a task is an exception return: load SPSR_EL1 and
//! ELR_EL1 from the task's register image, point the right stack at the
//! task's stack and ERET. The mode word decides the stack register:
//!
//! - EL0t: the task's stack goes to SP_EL0 and the kernel stack is
//!   rewound to `__stack_top` — every ERET leaves the shared kernel
//!   stack empty.
//! - EL1h: SP is loaded from the task directly.
//!
//! The whole register file is reloaded from the image (x0 last — it is
//! the base pointer), so restoring a saved frame reproduces every
//! x-register at the continuation point. A fresh task starts from
//! whatever its constructor placed in the image (x30 = return handler).

use crate::task::TaskRegisters;
use core::arch::naked_asm;

/// Switch to a task. Never returns.
///
/// # Safety
/// `regs` must describe a dispatchable task: non-null `sp` and `pc`, a
/// valid mode word, and a stack that is either the task's own (EL1h) or
/// unused (EL0t).
pub unsafe fn restore(regs: &TaskRegisters) -> ! {
    // SAFETY: forwarded caller contract; the pointee stays alive until
    // the ERET because nothing below touches this frame's stack.
    unsafe { restore_asm(regs) }
}

/// The byte offsets below are pinned in `task.rs`:
/// gpr[n] = n * 8, sp = 248, spsr_el1 = 264, elr_el1 = 272.
#[unsafe(naked)]
unsafe extern "C" fn restore_asm(regs: *const TaskRegisters) -> ! {
    naked_asm!(
        "ldr x1, [x0, #264]", // spsr_el1
        "msr spsr_el1, x1",
        "ldr x2, [x0, #272]", // elr_el1
        "msr elr_el1, x2",
        "ldr x3, [x0, #248]", // sp
        "and x4, x1, #0xF",
        "cbnz x4, 1f",
        // EL0t: user stack to SP_EL0, kernel stack rewound to the top.
        "msr sp_el0, x3",
        "adrp x3, __stack_top",
        "add x3, x3, :lo12:__stack_top",
        "1:",
        "mov sp, x3",
        "dsb sy",
        "isb",
        "ldp x2, x3, [x0, #16]",
        "ldp x4, x5, [x0, #32]",
        "ldp x6, x7, [x0, #48]",
        "ldp x8, x9, [x0, #64]",
        "ldp x10, x11, [x0, #80]",
        "ldp x12, x13, [x0, #96]",
        "ldp x14, x15, [x0, #112]",
        "ldp x16, x17, [x0, #128]",
        "ldp x18, x19, [x0, #144]",
        "ldp x20, x21, [x0, #160]",
        "ldp x22, x23, [x0, #176]",
        "ldp x24, x25, [x0, #192]",
        "ldp x26, x27, [x0, #208]",
        "ldp x28, x29, [x0, #224]",
        "ldr x30, [x0, #240]",
        "ldr x1, [x0, #8]",
        "ldr x0, [x0]",
        "eret",
    );
}
