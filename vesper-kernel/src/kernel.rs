//! Kernel Main
//!
//! Entered from the second boot stage with the console up and the
//! vector table installed. Verifies the boot handoff, brings up memory,
//! interrupts, syscalls and the scheduler, creates the initial
//! processes and starts scheduling. Any failure past this point halts.

use vesper_common::BootInfo;
use vesper_common::config::DEGRADED_RAM_SIZE;
use vesper_pal::{gic, println};

use crate::process::{self, ProcessKind};
use crate::{boot, irq, logging, memory, sched, syscall, user};

/// Kernel entry point.
pub fn kernel_main(boot_info: &BootInfo) -> ! {
    println!("Kernel started successfully!");

    // Degraded mode on a bad magic: log it and carry on with a
    // conservative RAM assumption, touching no other field.
    let ram_size = if boot_info.is_valid() {
        println!("Boot info verified. System details:");
        println!("- RAM: {} MB", boot_info.ram_size / (1024 * 1024));
        println!("- Kernel image: {} KB", boot_info.kernel_size / 1024);
        boot_info.ram_size
    } else {
        println!("WARNING: Boot info invalid or missing");
        DEGRADED_RAM_SIZE
    };

    logging::init();

    let kernel_start = boot::image_start();
    let kernel_end = boot::image_end();
    log::info!("Kernel image {:#x}..{:#x}", kernel_start, kernel_end);

    // SAFETY: called once, with the image bounds from the linker; RAM
    // past the image is unused.
    if let Err(e) = unsafe { memory::init(ram_size, kernel_start, kernel_end) } {
        fatal("memory bring-up failed", e);
    }

    // SAFETY: called once, before any interrupt is enabled.
    unsafe { gic::init() };
    irq::init();
    syscall::init();
    if let Err(e) = sched::init() {
        fatal("scheduler init failed", e);
    }

    if let Err(e) = process::create_from_entry("idle", user::idle_main, ProcessKind::Kernel) {
        fatal("creating the idle process failed", e);
    }
    match process::create_from_entry("init", user::init_main, ProcessKind::User) {
        Ok(pid) => {
            if let Err(e) = process::set_arguments(pid, &["init"]) {
                log::warn!("setting init arguments failed: {}", e.name());
            }
        }
        Err(e) => fatal("creating the init process failed", e),
    }

    log::info!("Starting scheduler");
    match sched::start() {
        Err(e) => fatal("scheduler start failed", e),
        // start() only ever returns an error; a successful start
        // dispatches the first task and never comes back.
        Ok(()) => vesper_arch::halt(),
    }
}

fn fatal(what: &str, status: vesper_common::Status) -> ! {
    println!("FATAL: {}: {}", what, status.name());
    vesper_arch::halt()
}
