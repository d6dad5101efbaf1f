//! Round-Robin Scheduler
//!
//! Timer-driven preemptive scheduling over the task ring. On every tick
//! the handler saves the interrupted task's state from the exception
//! frame, flips it Running→Ready, advances round-robin to the next
//! Ready task and dispatches it through the ERET restore path — which
//! never returns, so the tick handler signals end-of-interrupt itself
//! before switching.
//!
//! Lock order everywhere in the kernel: process table before task
//! table.

mod context;

use core::sync::atomic::{AtomicBool, Ordering};

use vesper_arch::{InterruptFrame, cpu};
use vesper_common::config::{SCHEDULER_TICK_MS, TIMER_IRQ};
use vesper_common::{KernelResult, Status};
use vesper_pal::{gic, timer};

use crate::process::{PROCESSES, ProcessTable};
use crate::task::{TASKS, TaskIdx, TaskRegisters, TaskState, TaskTable};

static RUNNING: AtomicBool = AtomicBool::new(false);

/// Initialise the scheduler: timer up, tick handler subscribed,
/// interval programmed.
pub fn init() -> KernelResult<()> {
    timer::init()?;
    timer::subscribe(scheduler_tick)?;
    timer::set_interval(SCHEDULER_TICK_MS)?;
    log::info!("Scheduler initialised ({} ms tick)", SCHEDULER_TICK_MS);
    Ok(())
}

/// Whether the scheduler is between `start` and `stop`.
#[must_use]
pub fn is_running() -> bool {
    RUNNING.load(Ordering::Acquire)
}

/// Start scheduling: enable the tick, unmask IRQs and dispatch the
/// first Ready task. Does not return on success; on failure the timer
/// and IRQ state are rolled back.
pub fn start() -> KernelResult<()> {
    timer::enable()?;
    cpu::irq_enable();
    RUNNING.store(true, Ordering::Release);

    let first = {
        let mut procs = PROCESSES.lock();
        let mut tasks = TASKS.lock();
        tasks
            .first_ready()
            .map(|idx| prepare_dispatch(&mut procs, &mut tasks, idx))
    };

    match first {
        Some(regs) => {
            // SAFETY: the register image belongs to a Ready task whose
            // stack and entry point were set up at creation.
            unsafe { context::restore(&regs) }
        }
        None => {
            RUNNING.store(false, Ordering::Release);
            let _ = timer::disable();
            cpu::irq_disable();
            Err(Status::NoTask)
        }
    }
}

/// Stop scheduling. Does not force a context switch; the current task
/// keeps the CPU.
pub fn stop() -> KernelResult<()> {
    timer::disable()?;
    RUNNING.store(false, Ordering::Release);
    Ok(())
}

/// Mark a task chosen: Running state, current task and current process
/// updated. Returns a copy of its registers for the restore path.
fn prepare_dispatch(
    procs: &mut ProcessTable,
    tasks: &mut TaskTable,
    idx: TaskIdx,
) -> TaskRegisters {
    let task = tasks.get_mut(idx).expect("dispatching a freed task");
    // Null SP or PC here means the register image was never set up;
    // continuing would ERET into nothing.
    assert!(
        task.registers.sp != 0 && task.registers.pc != 0,
        "dispatching task {} with null sp/pc",
        task.id
    );

    task.state = TaskState::Running;
    let regs = task.registers.clone();
    procs.current = task.process;
    tasks.set_current(idx);
    regs
}

/// Timer tick: save the interrupted context, pick the next Ready task
/// round-robin, switch. Runs with IRQs masked by the exception entry.
fn scheduler_tick(frame: &mut InterruptFrame) {
    if !is_running() {
        return;
    }

    let next = {
        let mut procs = PROCESSES.lock();
        let mut tasks = TASKS.lock();

        let candidate = match tasks.current() {
            Some(cur) => {
                if let Some(task) = tasks.get_mut(cur) {
                    task.registers.save_from(frame);
                    if task.state == TaskState::Running {
                        task.state = TaskState::Ready;
                    }
                }
                tasks.next_ready_after(cur)
            }
            None => tasks.first_ready(),
        };

        candidate.map(|idx| prepare_dispatch(&mut procs, &mut tasks, idx))
    };

    let Some(regs) = next else {
        // Nothing runnable; return through the stub and resume the
        // interrupted context unchanged.
        return;
    };

    // The restore path never returns through the IRQ stub, so the
    // dispatcher's end-of-interrupt is unreachable; signal it here.
    gic::eoi(TIMER_IRQ);

    // SAFETY: the register image was validated by prepare_dispatch and
    // all locks are released.
    unsafe { context::restore(&regs) }
}

/// Voluntary scheduling point for paths that gave up their context
/// (PROCESS_EXIT). Picks the first Ready task from the ring head; with
/// nothing left to run the kernel halts.
pub fn schedule() -> ! {
    let next = {
        let mut procs = PROCESSES.lock();
        let mut tasks = TASKS.lock();
        tasks
            .first_ready()
            .map(|idx| prepare_dispatch(&mut procs, &mut tasks, idx))
    };

    match next {
        // SAFETY: validated register image, locks released.
        Some(regs) => unsafe { context::restore(&regs) },
        None => {
            log::error!("No runnable task left; halting");
            vesper_arch::halt()
        }
    }
}
