//! GICv2 Interrupt Controller
//!
//! Driver wrapper around `arm_gic::gicv2::GicV2` plus the kernel's
//! interrupt handler table. QEMU `virt` with `gic-version=2` puts the
//! distributor at 0x0800_1000 and the CPU interface at 0x0800_2000.
//!
//! Handlers receive the interrupt frame so a handler may rewrite the
//! interrupted context (the scheduler does). A handler that dispatches a
//! different task never returns here; such handlers must signal end of
//! interrupt themselves via [`eoi`] before leaving.

use arm_gic::gicv2::GicV2;
use arm_gic::{IntId, Trigger};
use spin::Mutex;

use vesper_arch::InterruptFrame;
use vesper_common::config::MAX_INTERRUPT_HANDLERS;
use vesper_common::{KernelResult, Status};

use crate::platform;

/// Interrupt handler type. `intid` is the acknowledged interrupt ID.
pub type IrqHandler = fn(intid: u32, frame: &mut InterruptFrame);

/// Registered handlers, indexed by interrupt ID.
static IRQ_HANDLERS: Mutex<[Option<IrqHandler>; MAX_INTERRUPT_HANDLERS]> =
    Mutex::new([None; MAX_INTERRUPT_HANDLERS]);

enum GicDriver {
    V2(GicV2<'static>),
    Uninitialised,
}

// SAFETY: GicV2 holds raw MMIO pointers; all access goes through the
// Mutex below.
unsafe impl Send for GicDriver {}
unsafe impl Sync for GicDriver {}

static GIC: Mutex<GicDriver> = Mutex::new(GicDriver::Uninitialised);

/// Bring up the distributor and CPU interface.
///
/// Performs the full GICv2 init sequence: distributor disabled, all
/// interrupts level-triggered, disabled and un-pended, distributor
/// enabled, priority mask 0xFF, binary point 0, CPU interface enabled.
///
/// # Safety
/// Must be called exactly once, before any interrupt is enabled. The
/// platform addresses must be the GIC's MMIO regions and nothing else
/// may touch them.
pub unsafe fn init() {
    use arm_gic::gicv2::registers::{Gicc, Gicd};

    let gicd_ptr = platform::GICD_BASE as *mut Gicd;
    let gicc_ptr = platform::GICC_BASE as *mut Gicc;

    // SAFETY: the pointers are the QEMU virt GIC regions; the caller
    // guarantees exclusive access.
    let mut gic = unsafe { GicV2::new(gicd_ptr, gicc_ptr) };

    gic.setup();
    gic.set_priority_mask(0xFF);

    *GIC.lock() = GicDriver::V2(gic);
    log::info!("GICv2 initialised (GICD={:#x}, GICC={:#x})", platform::GICD_BASE, platform::GICC_BASE);
}

/// Enable an interrupt at the distributor.
pub fn enable_irq(intid: u32) {
    match &mut *GIC.lock() {
        GicDriver::V2(gic) => {
            let _ = gic.enable_interrupt(intid_from_raw(intid), true);
        }
        GicDriver::Uninitialised => panic!("GIC not initialised"),
    }
}

/// Disable an interrupt at the distributor.
pub fn disable_irq(intid: u32) {
    match &mut *GIC.lock() {
        GicDriver::V2(gic) => {
            let _ = gic.enable_interrupt(intid_from_raw(intid), false);
        }
        GicDriver::Uninitialised => panic!("GIC not initialised"),
    }
}

/// Configure an interrupt's trigger mode.
pub fn set_trigger(intid: u32, edge: bool) {
    let trigger = if edge { Trigger::Edge } else { Trigger::Level };
    match &mut *GIC.lock() {
        GicDriver::V2(gic) => gic.set_trigger(intid_from_raw(intid), trigger),
        GicDriver::Uninitialised => panic!("GIC not initialised"),
    }
}

/// Register a handler for an interrupt ID.
///
/// Fails with [`Status::InUse`] if the slot is already occupied and
/// [`Status::InvArg`] for IDs beyond the handler table.
pub fn register_handler(intid: u32, handler: IrqHandler) -> KernelResult<()> {
    let mut handlers = IRQ_HANDLERS.lock();
    let slot = handlers
        .get_mut(intid as usize)
        .ok_or(Status::InvArg)?;
    if slot.is_some() {
        return Err(Status::InUse);
    }
    *slot = Some(handler);
    Ok(())
}

/// Remove a registered handler, restoring the slot to empty.
pub fn unregister_handler(intid: u32) -> KernelResult<()> {
    let mut handlers = IRQ_HANDLERS.lock();
    let slot = handlers
        .get_mut(intid as usize)
        .ok_or(Status::InvArg)?;
    *slot = None;
    Ok(())
}

/// Acknowledge the highest-priority pending interrupt.
fn acknowledge() -> Option<u32> {
    match &mut *GIC.lock() {
        GicDriver::V2(gic) => gic.get_and_acknowledge_interrupt().map(|id| id.into()),
        GicDriver::Uninitialised => None,
    }
}

/// Signal end of interrupt for an acknowledged ID.
pub fn eoi(intid: u32) {
    match &mut *GIC.lock() {
        GicDriver::V2(gic) => gic.end_interrupt(intid_from_raw(intid)),
        GicDriver::Uninitialised => {}
    }
}

/// IRQ dispatch, called from the exception IRQ handler.
///
/// Acknowledges the interrupt, drops spurious IDs (>= 1020) without
/// invoking anything or signalling EOI, otherwise runs the registered
/// handler with no locks held and signals EOI afterwards.
pub fn dispatch_irq(frame: &mut InterruptFrame) {
    let Some(intid) = acknowledge() else {
        return;
    };

    // INTIDs 1020..1023 are spurious or reserved.
    if intid >= 1020 {
        return;
    }

    let handler = {
        let handlers = IRQ_HANDLERS.lock();
        handlers.get(intid as usize).and_then(|h| *h)
    };

    if let Some(handler) = handler {
        handler(intid, frame);
    } else {
        log::warn!("IRQ {} has no registered handler", intid);
    }

    eoi(intid);
}

/// Convert a raw interrupt ID into the driver's banked `IntId`.
///
/// 0..16 are SGIs, 16..32 PPIs, 32 and up SPIs.
fn intid_from_raw(intid: u32) -> IntId {
    if intid < 16 {
        IntId::sgi(intid)
    } else if intid < 32 {
        IntId::ppi(intid - 16)
    } else {
        IntId::spi(intid - 32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_intid: u32, _frame: &mut InterruptFrame) {}

    #[test]
    fn handler_slots_register_once_and_restore_on_unregister() {
        register_handler(42, noop).unwrap();
        assert_eq!(register_handler(42, noop), Err(Status::InUse));

        unregister_handler(42).unwrap();
        register_handler(42, noop).unwrap();
        unregister_handler(42).unwrap();

        assert_eq!(register_handler(1024, noop), Err(Status::InvArg));
        assert_eq!(unregister_handler(1024), Err(Status::InvArg));
    }
}
