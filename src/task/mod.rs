//! Preemptive Task Scheduling
//!
//! Strict round robin over a fixed insertion order, driven by the timer
//! IRQ. A task's register snapshot is the [`TrapFrame`] the entry stub
//! pushed on the task's own stack when it was interrupted, so switching
//! tasks is nothing more than telling the stub to resume a different frame.
//!
//! # Task Lifecycle
//! 1. `spawn` allocates a stack and builds a synthetic frame on it: Ready
//! 2. A timer tick picks it: Running
//! 3. The next tick (or a yield) puts it back: Ready
//! 4. `block` takes it out of the rotation until `unblock`: Blocked
//! 5. `exit_current` drops it; its stack is freed one switch later
//!
//! The boot context becomes task 0 ("kernel") and gets its snapshot at the
//! first tick. When every task is Blocked a reserved idle task halts until
//! the next interrupt.

use alloc::vec::Vec;
use core::fmt;
use core::mem::{self, size_of};
use core::ptr::NonNull;

use crate::arch;
use crate::arch::gdt::KernelSelectors;
use crate::interrupts::{Resume, TrapFrame};

/// Entry point of a spawned task. Tasks leave through the `Exit` syscall.
pub type TaskEntry = extern "C" fn() -> !;

/// IF set plus the always-one bit 1.
const INITIAL_RFLAGS: u64 = 0x202;

/// Smallest stack `spawn` accepts: the initial frame, a return slot and
/// alignment slack.
pub const MIN_STACK_SIZE: usize = size_of::<TrapFrame>() + 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl TaskId {
    pub const KERNEL: TaskId = TaskId(0);
    pub const IDLE: TaskId = TaskId(1);
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    OutOfMemory,
    StackTooSmall(usize),
    NoSuchTask(TaskId),
    InvalidTransition(TaskId, TaskState),
    IdleCannotExit,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory for task stack"),
            Self::StackTooSmall(size) => write!(f, "stack of {} bytes is too small", size),
            Self::NoSuchTask(id) => write!(f, "no task {}", id),
            Self::InvalidTransition(id, state) => {
                write!(f, "task {} cannot leave state {:?} that way", id, state)
            }
            Self::IdleCannotExit => f.write_str("the idle task cannot exit"),
        }
    }
}

struct Task {
    id: TaskId,
    name: &'static str,
    state: TaskState,
    /// Where the task was last interrupted. `None` only for the boot
    /// context before its first tick.
    context: Option<NonNull<TrapFrame>>,
    /// Owned stack; the boot context runs on the bootloader's.
    stack: Option<Vec<u8>>,
}

// Safety: `context` points into `stack` (or the boot stack) and is only
// dereferenced by the entry stub while the scheduler lock is not held.
unsafe impl Send for Task {}

/// Read-only view of a task for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: &'static str,
    pub state: TaskState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Current {
    Task(usize),
    Idle,
    /// The task that sat at this index exited during the current interrupt.
    Exited(usize),
}

pub struct TaskScheduler {
    tasks: Vec<Task>,
    idle: Task,
    current: Current,
    /// Last rotation slot that ran, so idle resumes the rotation in order.
    last: usize,
    selectors: KernelSelectors,
    stack_size: usize,
    next_id: u32,
    need_resched: bool,
    dying: Option<Task>,
    graveyard: Vec<Task>,
    switches: u64,
}

impl TaskScheduler {
    /// Adopts the caller's context as the running task 0 and prepares the
    /// idle task.
    pub fn new(selectors: KernelSelectors, stack_size: usize) -> Result<Self, SchedulerError> {
        let kernel = Task {
            id: TaskId::KERNEL,
            name: "kernel",
            state: TaskState::Running,
            context: None,
            stack: None,
        };
        let idle = build_task(TaskId::IDLE, "idle", idle_loop, selectors, MIN_STACK_SIZE.max(4096))?;

        let mut tasks = Vec::new();
        tasks.try_reserve(8).map_err(|_| SchedulerError::OutOfMemory)?;
        tasks.push(kernel);

        Ok(Self {
            tasks,
            idle,
            current: Current::Task(0),
            last: 0,
            selectors,
            stack_size,
            next_id: 2,
            need_resched: false,
            dying: None,
            graveyard: Vec::new(),
            switches: 0,
        })
    }

    pub fn spawn(&mut self, name: &'static str, entry: TaskEntry) -> Result<TaskId, SchedulerError> {
        self.spawn_with_stack(name, entry, self.stack_size)
    }

    pub fn spawn_with_stack(
        &mut self,
        name: &'static str,
        entry: TaskEntry,
        stack_size: usize,
    ) -> Result<TaskId, SchedulerError> {
        let id = TaskId(self.next_id);
        let task = build_task(id, name, entry, self.selectors, stack_size)?;
        self.tasks.try_reserve(1).map_err(|_| SchedulerError::OutOfMemory)?;
        self.tasks.push(task);
        self.next_id += 1;
        log::debug!("task: spawned {} '{}' with {} byte stack", id, name, stack_size);
        Ok(id)
    }

    /// Saves `frame` as the running task's snapshot and picks the next
    /// Ready task after it, wrapping around. Falls back to idle.
    pub fn schedule(&mut self, frame: &mut TrapFrame) -> Resume {
        // Anything here exited before the previous switch, so nobody is
        // still running on its stack.
        self.graveyard.clear();
        if let Some(task) = self.dying.take() {
            self.graveyard.push(task);
        }
        self.need_resched = false;

        let saved = NonNull::from(&mut *frame);
        let start = match self.current {
            Current::Task(index) => {
                let task = &mut self.tasks[index];
                task.context = Some(saved);
                if task.state == TaskState::Running {
                    task.state = TaskState::Ready;
                }
                index + 1
            }
            Current::Idle => {
                self.idle.context = Some(saved);
                self.idle.state = TaskState::Ready;
                self.last + 1
            }
            Current::Exited(index) => index,
        };

        let next = self.pick_from(start);
        let resume_at = match next {
            Some(index) => {
                let task = &mut self.tasks[index];
                task.state = TaskState::Running;
                self.current = Current::Task(index);
                self.last = index;
                task.context
            }
            None => {
                self.idle.state = TaskState::Running;
                self.current = Current::Idle;
                self.idle.context
            }
        };

        match resume_at {
            Some(ptr) if ptr != saved => {
                self.switches += 1;
                Resume::Switch(ptr)
            }
            Some(_) => Resume::Interrupted,
            None => {
                log::error!("task: next task has no saved context, staying put");
                Resume::Interrupted
            }
        }
    }

    fn pick_from(&self, start: usize) -> Option<usize> {
        let n = self.tasks.len();
        (0..n)
            .map(|k| (start + k) % n)
            .find(|&index| self.tasks[index].state == TaskState::Ready)
    }

    /// Takes `id` out of the rotation. Blocking the running task requests
    /// an immediate reschedule, which the syscall gate or the dispatcher
    /// carries out before the interrupt returns.
    pub fn block(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(SchedulerError::NoSuchTask(id))?;
        match task.state {
            TaskState::Running => {
                task.state = TaskState::Blocked;
                self.need_resched = true;
                Ok(())
            }
            TaskState::Ready => {
                task.state = TaskState::Blocked;
                Ok(())
            }
            TaskState::Blocked => Err(SchedulerError::InvalidTransition(id, TaskState::Blocked)),
        }
    }

    pub fn block_current(&mut self) -> Result<(), SchedulerError> {
        self.block(self.current_id())
    }

    /// Blocked → Ready. The task runs when the rotation reaches it.
    pub fn unblock(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        let task = self.task_mut(id)?;
        match task.state {
            TaskState::Blocked => {
                task.state = TaskState::Ready;
                Ok(())
            }
            state => Err(SchedulerError::InvalidTransition(id, state)),
        }
    }

    /// Removes the running task. The caller must reschedule before
    /// returning to the interrupted frame.
    pub fn exit_current(&mut self) -> Result<TaskId, SchedulerError> {
        let Current::Task(index) = self.current else {
            return Err(SchedulerError::IdleCannotExit);
        };
        let task = self.tasks.remove(index);
        let id = task.id;
        log::debug!("task: {} '{}' exited", id, task.name);

        if let Some(previous) = self.dying.replace(task) {
            self.graveyard.push(previous);
        }
        if self.last >= index && self.last > 0 {
            self.last -= 1;
        }
        // The slot now holds the task after the one that left; `pick_from`
        // wraps it when the last slot exited.
        self.current = Current::Exited(index);
        self.need_resched = true;
        Ok(id)
    }

    pub fn current_id(&self) -> TaskId {
        match self.current {
            Current::Task(index) => self.tasks[index].id,
            Current::Idle => TaskId::IDLE,
            Current::Exited(_) => TaskId::IDLE,
        }
    }

    /// Makes the syscall gate reschedule before it returns.
    pub fn request_resched(&mut self) {
        self.need_resched = true;
    }

    /// Returns and clears the pending reschedule request.
    pub fn take_need_resched(&mut self) -> bool {
        mem::take(&mut self.need_resched)
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        if id == TaskId::IDLE {
            return Some(self.idle.state);
        }
        self.tasks.iter().find(|t| t.id == id).map(|t| t.state)
    }

    pub fn tasks(&self) -> impl Iterator<Item = TaskInfo> + '_ {
        self.tasks.iter().map(|t| TaskInfo {
            id: t.id,
            name: t.name,
            state: t.state,
        })
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn context_switches(&self) -> u64 {
        self.switches
    }

    /// Exited tasks whose stacks are not released yet.
    pub fn pending_reclaim(&self) -> usize {
        self.graveyard.len() + usize::from(self.dying.is_some())
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task, SchedulerError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(SchedulerError::NoSuchTask(id))
    }
}

fn build_task(
    id: TaskId,
    name: &'static str,
    entry: TaskEntry,
    selectors: KernelSelectors,
    stack_size: usize,
) -> Result<Task, SchedulerError> {
    if stack_size < MIN_STACK_SIZE {
        return Err(SchedulerError::StackTooSmall(stack_size));
    }
    let mut stack = Vec::new();
    stack
        .try_reserve_exact(stack_size)
        .map_err(|_| SchedulerError::OutOfMemory)?;
    stack.resize(stack_size, 0u8);

    // ABI: rsp + 8 is 16-byte aligned at function entry. The slot at rsp is
    // the (never used) return address.
    let top = (stack.as_mut_ptr() as usize + stack_size) & !0xF;
    let entry_rsp = top - 8;
    let frame_addr = top - 16 - size_of::<TrapFrame>();

    let frame = TrapFrame {
        rip: entry as usize as u64,
        cs: u64::from(selectors.code),
        rflags: INITIAL_RFLAGS,
        rsp: entry_rsp as u64,
        ss: u64::from(selectors.data),
        ..TrapFrame::default()
    };
    // Safety: both writes land inside `stack`, which is at least
    // MIN_STACK_SIZE long, and `frame_addr` is 16-byte aligned.
    let context = unsafe {
        (entry_rsp as *mut u64).write(0);
        let ptr = frame_addr as *mut TrapFrame;
        ptr.write(frame);
        NonNull::new_unchecked(ptr)
    };

    Ok(Task {
        id,
        name,
        state: TaskState::Ready,
        context: Some(context),
        stack: Some(stack),
    })
}

extern "C" fn idle_loop() -> ! {
    loop {
        arch::wait_for_interrupt();
    }
}

/// Gives up the rest of the current quantum.
pub fn yield_now() {
    crate::syscalls::raw::yield_now();
}

/// Blocks the calling task through the syscall gate, so the switch away
/// happens before the gate returns. Comes back once some other task (or
/// an IRQ handler) unblocks it.
pub fn block_current() {
    let ret = crate::syscalls::raw::block_current();
    if ret < 0 {
        log::warn!("task: block refused ({})", ret);
    }
}

/// Wakes `id` from task context.
pub fn unblock(id: TaskId) -> Result<(), crate::syscalls::SyscallError> {
    match crate::syscalls::raw::unblock(id.0) {
        ret if ret < 0 => Err(crate::syscalls::SyscallError::from_errno(ret)),
        _ => Ok(()),
    }
}
