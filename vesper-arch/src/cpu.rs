//! CPU Control
//!
//! Low-level CPU operations: identification, halt, barriers and
//! interrupt masking. On non-AArch64 hosts (unit tests) the masking
//! primitives degrade to no-ops so the spinlock stays usable.

use aarch64_cpu::registers::{CurrentEL, DAIF, MPIDR_EL1};
use tock_registers::interfaces::Readable;

#[cfg(target_arch = "aarch64")]
use core::arch::asm;

/// Affinity-0 CPU id from MPIDR_EL1.
#[must_use]
pub fn cpu_id() -> usize {
    (MPIDR_EL1.get() & 0xFF) as usize
}

/// Current exception level (0..3).
#[must_use]
pub fn current_el() -> u8 {
    ((CurrentEL.get() >> 2) & 0x3) as u8
}

/// Halt the CPU forever.
#[inline]
pub fn halt() -> ! {
    loop {
        wait_for_event();
    }
}

/// WFI.
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: WFI is always safe to execute at EL1.
    unsafe {
        asm!("wfi", options(nomem, nostack));
    }
    #[cfg(not(target_arch = "aarch64"))]
    core::hint::spin_loop();
}

/// WFE.
#[inline]
pub fn wait_for_event() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: WFE is always safe to execute at EL1.
    unsafe {
        asm!("wfe", options(nomem, nostack));
    }
    #[cfg(not(target_arch = "aarch64"))]
    core::hint::spin_loop();
}

/// Data synchronisation barrier, full system.
#[inline]
pub fn dsb_sy() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: barriers have no side effects beyond ordering.
    unsafe {
        asm!("dsb sy", options(nostack));
    }
}

/// Instruction synchronisation barrier.
#[inline]
pub fn isb() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: barriers have no side effects beyond ordering.
    unsafe {
        asm!("isb", options(nostack));
    }
}

/// Unmask IRQs at the CPU (clear DAIF.I).
#[inline]
pub fn irq_enable() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: modifying DAIF is safe at EL1.
    unsafe {
        asm!("msr daifclr, #2", options(nomem, nostack));
    }
}

/// Mask IRQs at the CPU (set DAIF.I).
#[inline]
pub fn irq_disable() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: modifying DAIF is safe at EL1.
    unsafe {
        asm!("msr daifset, #2", options(nomem, nostack));
    }
}

/// Check whether IRQs are unmasked.
#[must_use]
pub fn irqs_enabled() -> bool {
    DAIF.get() & (1 << 7) == 0
}

/// Mask all of DAIF and return the previous state for
/// [`restore_interrupts`].
#[must_use]
#[inline]
pub fn disable_interrupts() -> u64 {
    #[cfg(target_arch = "aarch64")]
    {
        let daif = DAIF.get();
        // SAFETY: modifying DAIF is safe at EL1.
        unsafe {
            asm!("msr daifset, #0xf", options(nomem, nostack));
        }
        return daif;
    }
    #[cfg(not(target_arch = "aarch64"))]
    0
}

/// Restore a DAIF state saved by [`disable_interrupts`].
#[inline]
pub fn restore_interrupts(daif: u64) {
    #[cfg(target_arch = "aarch64")]
    {
        use tock_registers::interfaces::Writeable;
        DAIF.set(daif);
    }
    #[cfg(not(target_arch = "aarch64"))]
    let _ = daif;
}
