//! Boot and Exception Level Descent
//!
//! `_start` runs from reset at the load address. The primary core masks
//! interrupts, sets up a stack and walks down from whatever exception
//! level firmware entered at (EL3 or EL2) to EL1, installs the vector
//! table, zeroes `.bss` and hands over to the Rust second stage, which
//! finishes SCTLR configuration, builds the boot info record and calls
//! `kernel_main`. Secondary cores park in WFE.

use core::arch::global_asm;
use core::cell::UnsafeCell;

use aarch64_cpu::registers::SCTLR_EL1;
use tock_registers::interfaces::ReadWriteable;

use vesper_arch::{cpu, exceptions};
use vesper_common::boot::{BOOT_INFO_MAGIC, BootInfo};
use vesper_pal::{console, platform};

global_asm!(
    r#"
    .section .text.boot, "ax"
    .global _start
_start:
    // Secondary cores have non-zero affinity; park them.
    mrs x0, mpidr_el1
    and x0, x0, #0xFF
    cbnz x0, 9f

    msr daifset, #0xf

    adrp x0, __stack_top
    add x0, x0, :lo12:__stack_top
    mov sp, x0

    mrs x0, CurrentEL
    lsr x0, x0, #2
    and x0, x0, #0x3
    cmp x0, #3
    b.eq 1f
    cmp x0, #2
    b.eq 2f
    b 3f

1:  // EL3: route to a non-secure AArch64 EL2 and drop.
    mov x1, xzr
    orr x1, x1, #(1 << 10)          // RW: lower ELs are AArch64
    orr x1, x1, #(1 << 0)           // NS
    msr scr_el3, x1
    msr cptr_el3, xzr               // no FP/SIMD traps
    adrp x1, vector_table
    add x1, x1, :lo12:vector_table
    msr vbar_el3, x1
    adr x1, 2f
    msr elr_el3, x1
    mov x1, #0x3c9                  // EL2h, DAIF masked
    msr spsr_el3, x1
    eret

2:  // EL2: EL1 is AArch64, drop to EL1h.
    mrs x1, hcr_el2
    orr x1, x1, #(1 << 31)          // RW
    msr hcr_el2, x1
    adr x1, 3f
    msr elr_el2, x1
    mov x1, #0x3c5                  // EL1h, DAIF masked
    msr spsr_el2, x1
    eret

3:  // EL1: fresh stack (SP_EL1 was never set on the EL3/EL2 paths).
    adrp x0, __stack_top
    add x0, x0, :lo12:__stack_top
    mov sp, x0

    adrp x0, vector_table
    add x0, x0, :lo12:vector_table
    msr vbar_el1, x0
    isb

    // Zero .bss in 8-byte stores.
    adrp x0, __bss_start
    add x0, x0, :lo12:__bss_start
    adrp x1, __bss_end
    add x1, x1, :lo12:__bss_end
4:  cmp x0, x1
    b.eq 5f
    str xzr, [x0], #8
    b 4b
5:
    bl boot_stage2

9:  // Secondary cores, and anything that falls through: sleep.
    wfe
    b 9b
    "#
);

unsafe extern "C" {
    static _start: u8;
    static _end: u8;
}

/// Start address of the kernel image.
#[must_use]
pub fn image_start() -> u64 {
    // SAFETY: linker-provided symbol; only its address is taken.
    unsafe { (&raw const _start) as u64 }
}

/// End address of the kernel image (past `.bss` and the kernel stack).
#[must_use]
pub fn image_end() -> u64 {
    // SAFETY: linker-provided symbol; only its address is taken.
    unsafe { (&raw const _end) as u64 }
}

struct BootInfoCell(UnsafeCell<BootInfo>);

// SAFETY: written once by the boot stage before any other context
// exists, read-only afterwards.
unsafe impl Sync for BootInfoCell {}

/// The handoff record lives in `.data`, assembled before `kernel_main`.
#[unsafe(link_section = ".data")]
static BOOT_INFO: BootInfoCell = BootInfoCell(UnsafeCell::new(BootInfo::empty()));

/// Second boot stage, entered from `_start` with the stack set, `.bss`
/// zeroed and DAIF masked.
///
/// # Safety
/// Called exactly once from the boot assembly.
#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.boot.stage2")]
unsafe extern "C" fn boot_stage2() -> ! {
    // Early SCTLR state: MMU off, alignment checks off, caches on.
    SCTLR_EL1.modify(
        SCTLR_EL1::M::Disable
            + SCTLR_EL1::A::Disable
            + SCTLR_EL1::C::Cacheable
            + SCTLR_EL1::I::Cacheable,
    );
    cpu::isb();

    exceptions::install();

    console::init(platform::UART_BASE);

    // SAFETY: single-threaded boot context; nothing reads the record
    // before kernel_main.
    let info = unsafe { &mut *BOOT_INFO.0.get() };
    info.magic = BOOT_INFO_MAGIC;
    info.architecture = 0xAA64;
    info.ram_size = platform::RAM_SIZE;
    info.kernel_size = image_end() - image_start();

    crate::kernel::kernel_main(info)
}
