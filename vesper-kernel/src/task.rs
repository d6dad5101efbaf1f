//! Tasks
//!
//! A task is one schedulable execution context: a full register image
//! plus scheduling state. Tasks live in a fixed arena ([`TaskTable`])
//! and link into a circular doubly-linked list through arena indices —
//! no pointer cycles. The scheduler walks the ring round-robin.

use vesper_arch::InterruptFrame;
use vesper_common::config::MAX_TASKS;
use vesper_common::{KernelResult, Status};

#[cfg(target_arch = "aarch64")]
use vesper_arch::IrqSpinMutex;

/// Full register image of a suspended task.
///
/// The first 256 bytes (x0..x30 and `sp`) lay out exactly like
/// [`InterruptFrame`], so saving a preempted task is a straight copy of
/// the frame with `pc` taken from `elr_el1`. The restore path reads the
/// fields at these byte offsets from assembly.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct TaskRegisters {
    /// General purpose registers x0..x30.
    pub gpr: [u64; 31],
    /// Stack pointer (SP_EL0 for user tasks, SP_EL1 for kernel tasks).
    pub sp: u64,
    /// Program counter at next dispatch.
    pub pc: u64,
    /// Saved program status (the mode word decides EL0t vs EL1h).
    pub spsr_el1: u64,
    /// Exception link register; kept equal to `pc`.
    pub elr_el1: u64,
}

/// Byte offset of `sp`, used by the restore assembly.
pub const REGS_SP_OFFSET: usize = 248;
/// Byte offset of `spsr_el1`, used by the restore assembly.
pub const REGS_SPSR_OFFSET: usize = 264;
/// Byte offset of `elr_el1`, used by the restore assembly.
pub const REGS_ELR_OFFSET: usize = 272;
/// Total size of the register image.
pub const REGS_SIZE: usize = 280;

const _: () = {
    assert!(core::mem::offset_of!(TaskRegisters, gpr) == 0);
    assert!(core::mem::offset_of!(TaskRegisters, sp) == REGS_SP_OFFSET);
    assert!(core::mem::offset_of!(TaskRegisters, pc) == 256);
    assert!(core::mem::offset_of!(TaskRegisters, spsr_el1) == REGS_SPSR_OFFSET);
    assert!(core::mem::offset_of!(TaskRegisters, elr_el1) == REGS_ELR_OFFSET);
    assert!(core::mem::size_of::<TaskRegisters>() == REGS_SIZE);
    // Prefix compatibility with the interrupt frame.
    assert!(
        core::mem::offset_of!(TaskRegisters, sp)
            == core::mem::offset_of!(InterruptFrame, sp)
    );
};

impl TaskRegisters {
    /// An all-zero image.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            gpr: [0; 31],
            sp: 0,
            pc: 0,
            spsr_el1: 0,
            elr_el1: 0,
        }
    }

    /// Capture a preempted task's state from its interrupt frame.
    ///
    /// This is the sole save path used by interrupt-driven preemption:
    /// the program counter is the exception return address.
    pub fn save_from(&mut self, frame: &InterruptFrame) {
        self.gpr = frame.gpr;
        self.sp = frame.sp;
        self.pc = frame.elr_el1;
        self.spsr_el1 = frame.spsr_el1;
        self.elr_el1 = frame.elr_el1;
    }
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, register image not yet valid.
    New,
    /// Runnable, waiting for the scheduler.
    Ready,
    /// Currently executing. At most one task per CPU.
    Running,
    /// Waiting; not dispatched until unblocked.
    Blocked,
    /// Terminal; never dispatched again.
    Finished,
}

/// Scheduling priority. Recorded on every task; the round-robin
/// scheduler does not yet weight by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    Low,
    Normal,
    High,
}

/// Arena index of a task, with a sentinel for "unlinked".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskIdx(u32);

impl TaskIdx {
    /// Sentinel: no task.
    pub const NONE: Self = Self(u32::MAX);

    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    #[must_use]
    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One schedulable task.
#[derive(Debug, Clone)]
pub struct Task {
    /// Monotonic task id.
    pub id: u32,
    pub state: TaskState,
    pub priority: TaskPriority,
    pub registers: TaskRegisters,
    /// Owning process (process table slot).
    pub process: Option<u16>,
    next: TaskIdx,
    prev: TaskIdx,
}

impl Task {
    fn new(id: u32, priority: TaskPriority) -> Self {
        Self {
            id,
            state: TaskState::New,
            priority,
            registers: TaskRegisters::zeroed(),
            process: None,
            next: TaskIdx::NONE,
            prev: TaskIdx::NONE,
        }
    }

    /// The task after this one in the ring.
    #[must_use]
    pub fn next(&self) -> TaskIdx {
        self.next
    }
}

/// Fixed task arena plus the circular ready ring.
pub struct TaskTable {
    slots: [Option<Task>; MAX_TASKS],
    head: TaskIdx,
    current: TaskIdx,
    next_id: u32,
}

impl TaskTable {
    /// An empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_TASKS],
            head: TaskIdx::NONE,
            current: TaskIdx::NONE,
            next_id: 0,
        }
    }

    /// Allocate a task and splice it into the ring at the tail.
    pub fn alloc(&mut self, priority: TaskPriority) -> KernelResult<TaskIdx> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Status::NoMem)?;
        let idx = TaskIdx(slot as u32);

        let mut task = Task::new(self.next_id, priority);
        self.next_id += 1;

        if self.head.is_none() {
            task.next = idx;
            task.prev = idx;
            self.slots[slot] = Some(task);
            self.head = idx;
        } else {
            let head = self.head;
            let tail = self.get(head).ok_or(Status::Fault)?.prev;
            task.next = head;
            task.prev = tail;
            self.slots[slot] = Some(task);
            self.get_mut(tail).ok_or(Status::Fault)?.next = idx;
            self.get_mut(head).ok_or(Status::Fault)?.prev = idx;
        }

        Ok(idx)
    }

    /// Unlink a task from the ring and release its slot.
    pub fn free(&mut self, idx: TaskIdx) -> KernelResult<()> {
        if idx.is_none() {
            return Err(Status::InvArg);
        }
        let task = self.slots[idx.index()].take().ok_or(Status::InvArg)?;

        if task.next == idx && task.prev == idx {
            // Last task in the ring.
            if self.head == idx {
                self.head = TaskIdx::NONE;
            }
        } else {
            if self.head == idx {
                self.head = task.next;
            }
            self.get_mut(task.prev).ok_or(Status::Fault)?.next = task.next;
            self.get_mut(task.next).ok_or(Status::Fault)?.prev = task.prev;
        }

        if self.current == idx {
            self.current = TaskIdx::NONE;
        }

        Ok(())
    }

    #[must_use]
    pub fn get(&self, idx: TaskIdx) -> Option<&Task> {
        if idx.is_none() {
            return None;
        }
        self.slots.get(idx.index())?.as_ref()
    }

    #[must_use]
    pub fn get_mut(&mut self, idx: TaskIdx) -> Option<&mut Task> {
        if idx.is_none() {
            return None;
        }
        self.slots.get_mut(idx.index())?.as_mut()
    }

    /// The task currently holding the CPU, if any.
    #[must_use]
    pub fn current(&self) -> Option<TaskIdx> {
        if self.current.is_none() {
            None
        } else {
            Some(self.current)
        }
    }

    pub fn set_current(&mut self, idx: TaskIdx) {
        self.current = idx;
    }

    /// Number of live tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Round-robin pick: walk the ring from the task after `start`,
    /// wrapping, and return the first Ready task. `start` itself is the
    /// last candidate, so a still-ready current task keeps the CPU when
    /// nothing else is runnable.
    #[must_use]
    pub fn next_ready_after(&self, start: TaskIdx) -> Option<TaskIdx> {
        let mut cur = self.get(start)?.next;
        loop {
            let task = self.get(cur)?;
            if task.state == TaskState::Ready {
                return Some(cur);
            }
            if cur == start {
                return None;
            }
            cur = task.next;
        }
    }

    /// First Ready task from the ring head; used for the very first
    /// dispatch and after the current task disappears.
    #[must_use]
    pub fn first_ready(&self) -> Option<TaskIdx> {
        let head = self.head;
        let mut cur = head;
        loop {
            let task = self.get(cur)?;
            if task.state == TaskState::Ready {
                return Some(cur);
            }
            cur = task.next;
            if cur == head {
                return None;
            }
        }
    }

    /// Block a task. A Finished task cannot be blocked.
    pub fn block(&mut self, idx: TaskIdx) -> KernelResult<()> {
        let task = self.get_mut(idx).ok_or(Status::InvArg)?;
        if task.state == TaskState::Finished {
            return Err(Status::InvArg);
        }
        task.state = TaskState::Blocked;
        Ok(())
    }

    /// Make a blocked task runnable again. A task in any other state is
    /// left alone.
    pub fn unblock(&mut self, idx: TaskIdx) -> KernelResult<()> {
        let task = self.get_mut(idx).ok_or(Status::InvArg)?;
        if task.state == TaskState::Blocked {
            task.state = TaskState::Ready;
        }
        Ok(())
    }

    /// Move a task to its terminal state. It is never dispatched again
    /// but stays in the ring until freed.
    pub fn finish(&mut self, idx: TaskIdx) -> KernelResult<()> {
        let task = self.get_mut(idx).ok_or(Status::InvArg)?;
        task.state = TaskState::Finished;
        Ok(())
    }

    /// Check the ring is a well-formed circular doubly-linked list
    /// containing every live slot exactly once. O(n); for tests.
    #[must_use]
    pub fn verify_ring(&self) -> bool {
        let live = self.len();
        if self.head.is_none() {
            return live == 0;
        }

        let mut seen = 0;
        let mut cur = self.head;
        loop {
            let Some(task) = self.get(cur) else {
                return false;
            };
            let Some(next) = self.get(task.next) else {
                return false;
            };
            if next.prev != cur {
                return false;
            }

            seen += 1;
            if seen > live {
                return false;
            }

            cur = task.next;
            if cur == self.head {
                break;
            }
        }

        seen == live
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Global task table.
#[cfg(target_arch = "aarch64")]
pub static TASKS: IrqSpinMutex<TaskTable> = IrqSpinMutex::new(TaskTable::new());

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(table: &mut TaskTable, idx: TaskIdx) {
        table.get_mut(idx).unwrap().state = TaskState::Ready;
    }

    #[test]
    fn ids_are_monotonic() {
        let mut t = TaskTable::new();
        let a = t.alloc(TaskPriority::Normal).unwrap();
        let b = t.alloc(TaskPriority::Normal).unwrap();
        assert_eq!(t.get(a).unwrap().id, 0);
        assert_eq!(t.get(b).unwrap().id, 1);
        assert!(t.verify_ring());
    }

    #[test]
    fn singleton_links_to_itself() {
        let mut t = TaskTable::new();
        let a = t.alloc(TaskPriority::Normal).unwrap();
        let task = t.get(a).unwrap();
        assert_eq!(task.next, a);
        assert_eq!(task.prev, a);
        assert!(t.verify_ring());
    }

    #[test]
    fn ring_splices_at_the_tail() {
        let mut t = TaskTable::new();
        let a = t.alloc(TaskPriority::Normal).unwrap();
        let b = t.alloc(TaskPriority::Normal).unwrap();
        let c = t.alloc(TaskPriority::Normal).unwrap();

        assert_eq!(t.get(a).unwrap().next, b);
        assert_eq!(t.get(b).unwrap().next, c);
        assert_eq!(t.get(c).unwrap().next, a);
        assert_eq!(t.get(a).unwrap().prev, c);
        assert!(t.verify_ring());
    }

    #[test]
    fn freeing_the_head_moves_it() {
        let mut t = TaskTable::new();
        let a = t.alloc(TaskPriority::Normal).unwrap();
        let b = t.alloc(TaskPriority::Normal).unwrap();
        let c = t.alloc(TaskPriority::Normal).unwrap();

        t.free(a).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(b).unwrap().next, c);
        assert_eq!(t.get(c).unwrap().next, b);
        assert!(t.verify_ring());
    }

    #[test]
    fn freeing_the_last_task_empties_the_ring() {
        let mut t = TaskTable::new();
        let a = t.alloc(TaskPriority::Normal).unwrap();
        t.free(a).unwrap();
        assert!(t.is_empty());
        assert!(t.verify_ring());
        assert_eq!(t.free(a), Err(Status::InvArg));
    }

    #[test]
    fn freeing_the_current_task_clears_current() {
        let mut t = TaskTable::new();
        let a = t.alloc(TaskPriority::Normal).unwrap();
        t.set_current(a);
        t.free(a).unwrap();
        assert!(t.current().is_none());
    }

    #[test]
    fn round_robin_walks_past_non_ready_tasks() {
        let mut t = TaskTable::new();
        let a = t.alloc(TaskPriority::Normal).unwrap();
        let b = t.alloc(TaskPriority::Normal).unwrap();
        let c = t.alloc(TaskPriority::Normal).unwrap();

        ready(&mut t, a);
        ready(&mut t, c);
        t.get_mut(b).unwrap().state = TaskState::Blocked;

        // From a, skip blocked b, land on c; from c wrap to a.
        assert_eq!(t.next_ready_after(a), Some(c));
        assert_eq!(t.next_ready_after(c), Some(a));
    }

    #[test]
    fn current_task_is_the_fallback_candidate() {
        let mut t = TaskTable::new();
        let a = t.alloc(TaskPriority::Normal).unwrap();
        ready(&mut t, a);
        assert_eq!(t.next_ready_after(a), Some(a));

        t.get_mut(a).unwrap().state = TaskState::Blocked;
        assert_eq!(t.next_ready_after(a), None);
    }

    #[test]
    fn first_ready_scans_from_the_head() {
        let mut t = TaskTable::new();
        let a = t.alloc(TaskPriority::Normal).unwrap();
        let b = t.alloc(TaskPriority::Normal).unwrap();
        assert_eq!(t.first_ready(), None);
        ready(&mut t, b);
        assert_eq!(t.first_ready(), Some(b));
        ready(&mut t, a);
        assert_eq!(t.first_ready(), Some(a));
    }

    #[test]
    fn block_and_unblock_transition_correctly() {
        let mut t = TaskTable::new();
        let a = t.alloc(TaskPriority::Normal).unwrap();
        ready(&mut t, a);

        t.block(a).unwrap();
        assert_eq!(t.get(a).unwrap().state, TaskState::Blocked);
        t.unblock(a).unwrap();
        assert_eq!(t.get(a).unwrap().state, TaskState::Ready);

        // Unblocking a ready task changes nothing.
        t.unblock(a).unwrap();
        assert_eq!(t.get(a).unwrap().state, TaskState::Ready);

        // A finished task is terminal.
        t.finish(a).unwrap();
        assert_eq!(t.block(a), Err(Status::InvArg));
        t.unblock(a).unwrap();
        assert_eq!(t.get(a).unwrap().state, TaskState::Finished);
        assert_eq!(t.first_ready(), None);
    }

    #[test]
    fn table_exhaustion_reports_no_memory() {
        let mut t = TaskTable::new();
        for _ in 0..MAX_TASKS {
            t.alloc(TaskPriority::Normal).unwrap();
        }
        assert_eq!(t.alloc(TaskPriority::Normal), Err(Status::NoMem));
    }

    #[test]
    fn save_from_frame_copies_every_register() {
        let mut frame = InterruptFrame::zeroed();
        for (i, r) in frame.gpr.iter_mut().enumerate() {
            *r = 0x1000 + i as u64;
        }
        frame.sp = 0x8_0000;
        frame.elr_el1 = 0x4020_0000;
        frame.spsr_el1 = 0x305;

        let mut regs = TaskRegisters::zeroed();
        regs.save_from(&frame);

        assert_eq!(regs.gpr, frame.gpr);
        assert_eq!(regs.sp, frame.sp);
        assert_eq!(regs.pc, frame.elr_el1);
        assert_eq!(regs.elr_el1, frame.elr_el1);
        assert_eq!(regs.spsr_el1, frame.spsr_el1);
    }
}
