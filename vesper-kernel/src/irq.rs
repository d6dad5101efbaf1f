//! Exception Routing
//!
//! Installs the kernel's handlers into the architecture vector slots:
//! IRQs go to the GIC dispatcher, synchronous exceptions are decoded by
//! exception class. An SVC from EL0 is a system call; an SVC from EL1
//! is a kernel bug and halts; every other synchronous cause is fatal
//! and halts with a full syndrome dump.

use vesper_arch::registers::{esr, read_esr_el1, read_far_el1};
use vesper_arch::{InterruptFrame, exceptions};
use vesper_pal::gic;

use crate::syscall::svc;

/// Install IRQ and synchronous exception handlers.
pub fn init() {
    exceptions::set_irq_handler(irq_entry);
    exceptions::set_sync_handler(sync_entry);
    log::info!("Exception handlers installed");
}

fn irq_entry(frame: &mut InterruptFrame) {
    gic::dispatch_irq(frame);
}

fn sync_entry(frame: &mut InterruptFrame) {
    let syndrome = read_esr_el1();
    let class = esr::exception_class(syndrome);

    match class {
        esr::ec::SVC_AARCH64 if frame.from_el0() => svc::handle(frame),
        esr::ec::SVC_AARCH64 => {
            panic!("SVC from EL1 at ELR={:#x}", frame.elr_el1);
        }
        _ => {
            panic!(
                "{}: ESR={:#x} ELR={:#x} FAR={:#x}",
                esr::ec_name(class),
                syndrome,
                frame.elr_el1,
                read_far_el1()
            );
        }
    }
}
