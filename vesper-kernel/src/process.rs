//! Processes
//!
//! A process binds a main task to an address-space description: program
//! code, a 128 KiB stack, a bounded table of heap allocations and an
//! argument vector. There is no MMU isolation in this configuration;
//! [`Process::memory_verify`] is the substitute used at the syscall
//! boundary.
//!
//! Processes occupy slots of a fixed table; a process id is its slot
//! index. Termination releases everything the process owns: allocation
//! slots (which include stack and program), the argv block, the task,
//! then the table slot.

use crate::task::TaskIdx;
use vesper_common::config::{MAX_PROCESS_ALLOCATIONS, MAX_PROCESS_NAME, MAX_PROCESSES};
use vesper_common::{KernelResult, Status};

#[cfg(target_arch = "aarch64")]
use vesper_arch::IrqSpinMutex;

/// Process id: a slot index into the process table.
pub type Pid = u16;

/// Whether a process runs at EL1 (kernel) or EL0 (user). Decides the
/// mode word its task is dispatched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Kernel,
    User,
}

impl ProcessKind {
    /// The SPSR_EL1 value tasks of this kind are dispatched with.
    #[must_use]
    pub const fn mode_word(self) -> u64 {
        use vesper_arch::registers::spsr;
        match self {
            ProcessKind::Kernel => spsr::MODE_EL1H,
            ProcessKind::User => spsr::MODE_EL0T,
        }
    }
}

/// One recorded heap allocation. `ptr == 0` marks the slot free.
#[derive(Debug, Clone, Copy, Default)]
pub struct Allocation {
    pub ptr: u64,
    pub size: usize,
}

impl Allocation {
    const EMPTY: Self = Self { ptr: 0, size: 0 };

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ptr == 0
    }

    fn contains(&self, addr: u64, size: usize) -> bool {
        !self.is_empty()
            && addr >= self.ptr
            && addr + size as u64 <= self.ptr + self.size as u64
    }
}

/// A process record.
pub struct Process {
    pub id: Pid,
    name: [u8; MAX_PROCESS_NAME],
    name_len: usize,
    pub kind: ProcessKind,
    /// Main execution task.
    pub task: TaskIdx,
    allocations: [Allocation; MAX_PROCESS_ALLOCATIONS],
    /// Program code buffer (also recorded in `allocations`).
    pub program: Allocation,
    /// Stack base (low address; also recorded in `allocations`).
    pub stack: u64,
    /// Argument count.
    pub argc: i32,
    /// C-style `char**` block in kernel heap memory; 0 when unset.
    pub argv: u64,
}

impl Process {
    /// A fresh record with no memory and no task.
    #[must_use]
    pub fn new(id: Pid, name: &str, kind: ProcessKind) -> Self {
        let mut name_buf = [0u8; MAX_PROCESS_NAME];
        let name_len = name.len().min(MAX_PROCESS_NAME);
        name_buf[..name_len].copy_from_slice(&name.as_bytes()[..name_len]);

        Self {
            id,
            name: name_buf,
            name_len,
            kind,
            task: TaskIdx::NONE,
            allocations: [Allocation::EMPTY; MAX_PROCESS_ALLOCATIONS],
            program: Allocation::EMPTY,
            stack: 0,
            argc: 0,
            argv: 0,
        }
    }

    /// Process name (bounded at creation).
    #[must_use]
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len]).unwrap_or("<invalid>")
    }

    /// Record a heap allocation in the first free slot.
    pub fn record_allocation(&mut self, ptr: u64, size: usize) -> KernelResult<usize> {
        let slot = self
            .allocations
            .iter()
            .position(Allocation::is_empty)
            .ok_or(Status::ProcessMax)?;
        self.allocations[slot] = Allocation { ptr, size };
        Ok(slot)
    }

    /// Clear the slot recording `ptr`. The caller frees the memory.
    pub fn clear_allocation(&mut self, ptr: u64) -> KernelResult<()> {
        let slot = self
            .allocations
            .iter()
            .position(|a| !a.is_empty() && a.ptr == ptr)
            .ok_or(Status::InvArg)?;
        self.allocations[slot] = Allocation::EMPTY;
        Ok(())
    }

    /// Iterate over live allocations.
    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.iter().filter(|a| !a.is_empty())
    }

    /// Total bytes of live allocations plus the program image.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.allocations().map(|a| a.size).sum::<usize>() + self.program.size
    }

    /// Check that `[addr, addr + size)` lies entirely within memory this
    /// process owns: its stack, its program code, or one allocation
    /// slot. This is the only isolation check on an MMU-less system.
    #[must_use]
    pub fn memory_verify(&self, addr: u64, size: usize) -> bool {
        if addr == 0 || size == 0 {
            return false;
        }

        use vesper_common::config::PROCESS_STACK_SIZE;
        if self.stack != 0 {
            let in_stack = addr >= self.stack
                && addr + size as u64 <= self.stack + PROCESS_STACK_SIZE as u64;
            if in_stack {
                return true;
            }
        }

        if self.program.contains(addr, size) {
            return true;
        }

        self.allocations.iter().any(|a| a.contains(addr, size))
    }
}

/// The process table: one optional record per slot, plus the slot of
/// the currently running process.
pub struct ProcessTable {
    slots: [Option<Process>; MAX_PROCESSES],
    /// The running process; `None` before the first dispatch and after
    /// the running process terminates.
    pub current: Option<Pid>,
}

impl ProcessTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_PROCESSES],
            current: None,
        }
    }

    /// First free slot index.
    pub fn find_free_slot(&self) -> KernelResult<Pid> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(|s| s as Pid)
            .ok_or(Status::ProcessMax)
    }

    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.slots.get(pid as usize)?.as_ref()
    }

    #[must_use]
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.slots.get_mut(pid as usize)?.as_mut()
    }

    /// Publish a record in its slot. The slot must be free and match
    /// the record's id.
    pub fn insert(&mut self, process: Process) -> KernelResult<()> {
        let slot = process.id as usize;
        if slot >= MAX_PROCESSES {
            return Err(Status::InvArg);
        }
        if self.slots[slot].is_some() {
            return Err(Status::InUse);
        }
        self.slots[slot] = Some(process);
        Ok(())
    }

    /// Take a record out of its slot.
    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        self.slots.get_mut(pid as usize)?.take()
    }

    /// The running process, if any.
    #[must_use]
    pub fn current_process(&self) -> Option<&Process> {
        self.get(self.current?)
    }

    /// Number of live processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Global process table.
#[cfg(target_arch = "aarch64")]
pub static PROCESSES: IrqSpinMutex<ProcessTable> = IrqSpinMutex::new(ProcessTable::new());

#[cfg(target_arch = "aarch64")]
mod lifecycle {
    use super::*;
    use crate::memory;
    use crate::task::{TASKS, TaskPriority, TaskState};
    use vesper_common::config::PROCESS_STACK_SIZE;

    /// Kernel landing pad for a task that returns off the end of its
    /// entry function. Falling off the end is a bug; halt loudly.
    #[unsafe(no_mangle)]
    extern "C" fn process_return_handler() -> ! {
        vesper_pal::println!("Process returned unexpectedly; halting");
        vesper_arch::halt();
    }

    /// Create a process from a program image copied into kernel heap
    /// memory. The copied code is made executable with explicit cache
    /// maintenance before the task can be dispatched.
    pub fn create(name: &str, program: &[u8], kind: ProcessKind) -> KernelResult<Pid> {
        create_internal(name, program, None, kind)
    }

    /// Create a process whose entry point is a function already in the
    /// kernel image. A placeholder program buffer keeps the record's
    /// program slot populated.
    pub fn create_from_entry(
        name: &str,
        entry: extern "C" fn(),
        kind: ProcessKind,
    ) -> KernelResult<Pid> {
        let placeholder = [0u8; 8];
        create_internal(name, &placeholder, Some(entry as usize as u64), kind)
    }

    fn create_internal(
        name: &str,
        program: &[u8],
        entry_override: Option<u64>,
        kind: ProcessKind,
    ) -> KernelResult<Pid> {
        if name.is_empty() || program.is_empty() {
            return Err(Status::InvArg);
        }

        let mut procs = PROCESSES.lock();
        let pid = procs.find_free_slot()?;
        let mut process = Process::new(pid, name, kind);

        // Stack, zeroed.
        let stack = memory::kzalloc(PROCESS_STACK_SIZE).ok_or(Status::NoMem)?;
        process.record_allocation(stack, PROCESS_STACK_SIZE)?;
        process.stack = stack;

        // Program copy, then instruction-cache maintenance so the fresh
        // bytes are fetchable.
        let Some(code) = memory::kmalloc(program.len()) else {
            memory::kfree(stack);
            return Err(Status::NoMem);
        };
        // SAFETY: `code` is a fresh heap allocation of at least
        // program.len() bytes.
        unsafe {
            core::ptr::copy_nonoverlapping(program.as_ptr(), code as *mut u8, program.len());
        }
        vesper_arch::cache::sync_code_range(code, program.len());
        process.record_allocation(code, program.len())?;
        process.program = Allocation {
            ptr: code,
            size: program.len(),
        };

        // Main task.
        let task_idx = {
            let mut tasks = TASKS.lock();
            match tasks.alloc(TaskPriority::Normal) {
                Ok(idx) => {
                    let entry = entry_override.unwrap_or(code);
                    let task = tasks.get_mut(idx).ok_or(Status::Fault)?;
                    task.process = Some(pid);
                    task.registers.pc = entry;
                    task.registers.elr_el1 = entry;
                    task.registers.sp = (stack + PROCESS_STACK_SIZE as u64) & !15;
                    task.registers.gpr[30] = process_return_handler as usize as u64;
                    task.registers.spsr_el1 = kind.mode_word();
                    task.state = TaskState::Ready;
                    idx
                }
                Err(e) => {
                    memory::kfree(code);
                    memory::kfree(stack);
                    return Err(e);
                }
            }
        };
        process.task = task_idx;

        log::info!(
            "Created {} process '{}' (pid {}, entry {:#x})",
            match kind {
                ProcessKind::Kernel => "kernel",
                ProcessKind::User => "user",
            },
            process.name(),
            pid,
            entry_override.unwrap_or(code),
        );

        procs.insert(process)?;
        Ok(pid)
    }

    /// Terminate a process: free its allocation slots, the argv block,
    /// the task, then the table slot. Terminating the running process
    /// invalidates `current` so the scheduler picks a fresh task.
    pub fn terminate(pid: Pid) -> KernelResult<()> {
        let mut procs = PROCESSES.lock();
        let process = procs.remove(pid).ok_or(Status::InvArg)?;

        for alloc in process.allocations() {
            memory::kfree(alloc.ptr);
        }

        free_argv(process.argc, process.argv);

        let _ = TASKS.lock().free(process.task);

        if procs.current == Some(pid) {
            procs.current = None;
        }

        log::info!("Terminated process '{}' (pid {})", process.name(), pid);
        Ok(())
    }

    /// Terminate the running process, if there is one.
    pub fn terminate_current() -> KernelResult<()> {
        let pid = {
            let procs = PROCESSES.lock();
            procs.current.ok_or(Status::InvArg)?
        };
        terminate(pid)
    }

    /// Allocate heap memory on behalf of the running process.
    pub fn current_malloc(size: usize) -> KernelResult<u64> {
        if size == 0 {
            return Err(Status::InvArg);
        }

        let mut procs = PROCESSES.lock();
        let pid = procs.current.ok_or(Status::InvArg)?;
        let process = procs.get_mut(pid).ok_or(Status::Fault)?;

        // Claim a slot before allocating so exhaustion costs nothing.
        process
            .allocations
            .iter()
            .position(Allocation::is_empty)
            .ok_or(Status::ProcessMax)?;

        let ptr = memory::kmalloc(size).ok_or(Status::NoMem)?;
        process.record_allocation(ptr, size)?;
        Ok(ptr)
    }

    /// Free memory owned by the running process.
    pub fn current_free(ptr: u64) -> KernelResult<()> {
        if ptr == 0 {
            return Err(Status::InvArg);
        }

        let mut procs = PROCESSES.lock();
        let pid = procs.current.ok_or(Status::InvArg)?;
        let process = procs.get_mut(pid).ok_or(Status::Fault)?;

        process.clear_allocation(ptr)?;
        memory::kfree(ptr);
        Ok(())
    }

    /// Verify a user-supplied address range against the running
    /// process's memory.
    #[must_use]
    pub fn current_memory_verify(addr: u64, size: usize) -> bool {
        let procs = PROCESSES.lock();
        procs
            .current_process()
            .is_some_and(|p| p.memory_verify(addr, size))
    }

    /// The running process id.
    #[must_use]
    pub fn current_pid() -> Option<Pid> {
        PROCESSES.lock().current
    }

    /// Arguments of the running process, as `(argc, argv)`.
    pub fn current_arguments() -> KernelResult<(i32, u64)> {
        let procs = PROCESSES.lock();
        let process = procs.current_process().ok_or(Status::InvArg)?;
        Ok((process.argc, process.argv))
    }

    /// Install an argument vector: a C-style `char**` block plus one
    /// NUL-terminated buffer per argument, all in kernel heap memory.
    /// Replaces (and frees) any existing vector.
    pub fn set_arguments(pid: Pid, args: &[&str]) -> KernelResult<()> {
        let argc = args.len();
        let argv = if argc == 0 { 0 } else { build_argv(args)? };

        let mut procs = PROCESSES.lock();
        let Some(process) = procs.get_mut(pid) else {
            free_argv(argc as i32, argv);
            return Err(Status::InvArg);
        };

        free_argv(process.argc, process.argv);
        process.argc = argc as i32;
        process.argv = argv;
        Ok(())
    }

    /// Arguments of a process by id.
    pub fn get_arguments(pid: Pid) -> KernelResult<(i32, u64)> {
        let procs = PROCESSES.lock();
        let process = procs.get(pid).ok_or(Status::InvArg)?;
        Ok((process.argc, process.argv))
    }

    fn build_argv(args: &[&str]) -> KernelResult<u64> {
        let argv = memory::kzalloc(args.len() * 8).ok_or(Status::NoMem)?;

        for (i, arg) in args.iter().enumerate() {
            let Some(buf) = memory::kmalloc(arg.len() + 1) else {
                free_argv(i as i32, argv);
                return Err(Status::NoMem);
            };
            // SAFETY: `buf` holds arg.len() + 1 bytes.
            unsafe {
                core::ptr::copy_nonoverlapping(arg.as_ptr(), buf as *mut u8, arg.len());
                core::ptr::write((buf + arg.len() as u64) as *mut u8, 0);
                core::ptr::write((argv + (i * 8) as u64) as *mut u64, buf);
            }
        }

        Ok(argv)
    }

    /// Free `argc` argument buffers and the vector itself.
    fn free_argv(argc: i32, argv: u64) {
        if argv == 0 {
            return;
        }
        for i in 0..argc.max(0) as usize {
            // SAFETY: `argv` holds argc consecutive pointers written by
            // build_argv.
            let entry = unsafe { core::ptr::read((argv + (i * 8) as u64) as *const u64) };
            if entry != 0 {
                memory::kfree(entry);
            }
        }
        memory::kfree(argv);
    }
}

#[cfg(target_arch = "aarch64")]
pub use lifecycle::{
    create, create_from_entry, current_arguments, current_free, current_malloc,
    current_memory_verify, current_pid, get_arguments, set_arguments, terminate,
    terminate_current,
};

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_common::config::PROCESS_STACK_SIZE;

    fn process() -> Process {
        Process::new(3, "test", ProcessKind::User)
    }

    #[test]
    fn name_is_bounded() {
        let raw = [b'x'; 2 * MAX_PROCESS_NAME];
        let long = core::str::from_utf8(&raw).unwrap();
        let p = Process::new(0, long, ProcessKind::User);
        assert_eq!(p.name().len(), MAX_PROCESS_NAME);
    }

    #[test]
    fn allocation_slots_exhaust_at_the_limit() {
        let mut p = process();
        for i in 0..MAX_PROCESS_ALLOCATIONS {
            p.record_allocation(0x1000 + (i as u64) * 0x1000, 16).unwrap();
        }
        assert_eq!(
            p.record_allocation(0xFFFF_0000, 16),
            Err(Status::ProcessMax)
        );
    }

    #[test]
    fn clearing_reopens_a_slot() {
        let mut p = process();
        p.record_allocation(0x1000, 64).unwrap();
        p.clear_allocation(0x1000).unwrap();
        assert_eq!(p.clear_allocation(0x1000), Err(Status::InvArg));
        assert_eq!(p.allocations().count(), 0);
    }

    #[test]
    fn memory_usage_sums_allocations_and_program() {
        let mut p = process();
        p.record_allocation(0x1000, 64).unwrap();
        p.record_allocation(0x2000, 100).unwrap();
        p.program = Allocation {
            ptr: 0x3000,
            size: 36,
        };
        assert_eq!(p.memory_usage(), 200);
    }

    #[test]
    fn memory_verify_accepts_owned_ranges_only() {
        let mut p = process();
        p.stack = 0x10_0000;
        p.program = Allocation {
            ptr: 0x8_0000,
            size: 0x1000,
        };
        p.record_allocation(0x4_0000, 0x100).unwrap();

        // Inside stack.
        assert!(p.memory_verify(0x10_0000, 16));
        assert!(p.memory_verify(0x10_0000 + PROCESS_STACK_SIZE as u64 - 8, 8));
        // Straddling the stack end.
        assert!(!p.memory_verify(0x10_0000 + PROCESS_STACK_SIZE as u64 - 8, 16));
        // Inside program.
        assert!(p.memory_verify(0x8_0000, 0x1000));
        // Inside an allocation.
        assert!(p.memory_verify(0x4_0000 + 0x10, 0x10));
        // Outside everything.
        assert!(!p.memory_verify(0x2_0000, 8));
        // Degenerate ranges.
        assert!(!p.memory_verify(0, 8));
        assert!(!p.memory_verify(0x10_0000, 0));
    }

    #[test]
    fn table_slots_and_ids_agree() {
        let mut t = ProcessTable::new();
        let pid = t.find_free_slot().unwrap();
        t.insert(Process::new(pid, "a", ProcessKind::Kernel)).unwrap();
        assert_eq!(t.get(pid).unwrap().id, pid);
        assert_eq!(t.len(), 1);

        // The slot is occupied now.
        assert_eq!(
            t.insert(Process::new(pid, "b", ProcessKind::Kernel)),
            Err(Status::InUse)
        );

        t.remove(pid).unwrap();
        assert!(t.is_empty());
    }

    #[test]
    fn table_exhaustion_reports_process_max() {
        let mut t = ProcessTable::new();
        for _ in 0..MAX_PROCESSES {
            let pid = t.find_free_slot().unwrap();
            t.insert(Process::new(pid, "p", ProcessKind::User)).unwrap();
        }
        assert_eq!(t.find_free_slot(), Err(Status::ProcessMax));
    }

    #[test]
    fn mode_words_follow_process_kind() {
        assert_eq!(ProcessKind::Kernel.mode_word(), 0x305);
        assert_eq!(ProcessKind::User.mode_word(), 0x0);
    }
}
