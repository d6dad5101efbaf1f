//! ARM Generic Timer
//!
//! Periodic tick source on the EL1 physical timer (PPI 30). The timer
//! owns its GIC interrupt; a single subscriber (the scheduler) is called
//! on every tick with the interrupt frame.

use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, Ordering};

use aarch64_cpu::registers::{CNTFRQ_EL0, CNTP_CTL_EL0, CNTP_CVAL_EL0, CNTPCT_EL0};
use tock_registers::interfaces::{Readable, Writeable};

use vesper_arch::{InterruptFrame, cpu};
use vesper_common::config::{TIMER_FALLBACK_FREQ_HZ, TIMER_IRQ};
use vesper_common::{KernelResult, Status};

use crate::gic;

/// Tick subscriber type. The subscriber may switch tasks and never
/// return; it must signal EOI for [`TIMER_IRQ`] itself in that case.
pub type TickHandler = fn(frame: &mut InterruptFrame);

static INITIALISED: AtomicBool = AtomicBool::new(false);
static TICKS: AtomicU64 = AtomicU64::new(0);
static INTERVAL_MS: AtomicU32 = AtomicU32::new(0);
static SUBSCRIBER: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Timer control register bits.
mod ctl {
    /// Timer enabled.
    pub const ENABLE: u64 = 1 << 0;
}

fn read_count() -> u64 {
    CNTPCT_EL0.get()
}

fn read_freq() -> u64 {
    CNTFRQ_EL0.get()
}

/// Initialise the timer: claim IRQ 30, stop the timer, and make sure
/// the counter frequency is programmed (QEMU firmware normally sets it;
/// fall back to 1 GHz when it reads zero).
pub fn init() -> KernelResult<()> {
    if INITIALISED.load(Ordering::Acquire) {
        return Ok(());
    }

    gic::register_handler(TIMER_IRQ, timer_irq_handler)?;
    gic::set_trigger(TIMER_IRQ, false);

    CNTP_CTL_EL0.set(0);

    if read_freq() == 0 {
        CNTFRQ_EL0.set(TIMER_FALLBACK_FREQ_HZ);
    }

    INITIALISED.store(true, Ordering::Release);
    log::info!("Timer initialised at {} Hz (IRQ {})", read_freq(), TIMER_IRQ);
    Ok(())
}

/// Subscribe the tick handler. Only one subscriber at a time.
pub fn subscribe(handler: TickHandler) -> KernelResult<()> {
    if !INITIALISED.load(Ordering::Acquire) {
        return Err(Status::NotReady);
    }
    SUBSCRIBER.store(handler as *mut (), Ordering::Release);
    Ok(())
}

/// Remove the tick subscriber.
pub fn unsubscribe() -> KernelResult<()> {
    if !INITIALISED.load(Ordering::Acquire) {
        return Err(Status::NotReady);
    }
    SUBSCRIBER.store(core::ptr::null_mut(), Ordering::Release);
    Ok(())
}

/// Program the tick interval and arm the first deadline.
pub fn set_interval(ms: u32) -> KernelResult<()> {
    if !INITIALISED.load(Ordering::Acquire) {
        return Err(Status::NotReady);
    }
    if ms == 0 {
        return Err(Status::InvArg);
    }

    INTERVAL_MS.store(ms, Ordering::Release);

    CNTP_CTL_EL0.set(0);
    CNTP_CVAL_EL0.set(read_count() + interval_ticks(ms));
    Ok(())
}

/// Enable the timer: counter compare on, IRQ 30 on at the GIC, IRQs
/// unmasked at the CPU.
pub fn enable() -> KernelResult<()> {
    if !INITIALISED.load(Ordering::Acquire) {
        return Err(Status::NotReady);
    }

    CNTP_CTL_EL0.set(ctl::ENABLE);
    gic::enable_irq(TIMER_IRQ);
    cpu::irq_enable();
    Ok(())
}

/// Disable the timer and its interrupt.
pub fn disable() -> KernelResult<()> {
    if !INITIALISED.load(Ordering::Acquire) {
        return Err(Status::NotReady);
    }

    CNTP_CTL_EL0.set(0);
    gic::disable_irq(TIMER_IRQ);
    Ok(())
}

/// Ticks elapsed since the timer was enabled.
#[must_use]
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Milliseconds elapsed since the timer was enabled, derived from the
/// tick counter and the programmed interval.
#[must_use]
pub fn uptime_ms() -> u64 {
    ticks() * INTERVAL_MS.load(Ordering::Relaxed) as u64
}

fn interval_ticks(ms: u32) -> u64 {
    (read_freq() * ms as u64) / 1000
}

/// Timer IRQ handler: count the tick, rearm the compare value for the
/// next period, then hand the frame to the subscriber.
fn timer_irq_handler(_intid: u32, frame: &mut InterruptFrame) {
    TICKS.fetch_add(1, Ordering::Relaxed);

    let ms = INTERVAL_MS.load(Ordering::Relaxed);
    if ms != 0 {
        CNTP_CVAL_EL0.set(read_count() + interval_ticks(ms));
    }

    let subscriber = SUBSCRIBER.load(Ordering::Acquire);
    if !subscriber.is_null() {
        // SAFETY: only TickHandler values are stored in SUBSCRIBER.
        let handler: TickHandler = unsafe { core::mem::transmute(subscriber) };
        handler(frame);
    }
}
