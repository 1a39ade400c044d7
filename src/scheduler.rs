//! # Scheduler
//!
//! Core scheduling logic. Implements a preemptive, fixed-priority scheduler
//! with round-robin time slicing between ready tasks of equal priority, tick
//! driven sleeps, and queues with blocking receive.
//!
//! Everything here is plain data manipulation: no interrupts, no assembly.
//! The kernel port (`kernel.rs`, `arch/`) owns the single global instance,
//! calls it from critical sections and from the SysTick and PendSV handlers,
//! and turns "needs reschedule" into an actual context switch.
//!
//! ## Scheduling Algorithm
//!
//! At each SysTick interrupt, [`Scheduler::tick`]:
//! 1. Advances the tick count
//! 2. Readies every blocked task whose deadline has passed; a queue waiter
//!    woken this way is flagged as timed out
//! 3. Requests a reschedule if some ready task has at least the running
//!    task's priority (equal priority means time slicing)
//!
//! [`Scheduler::schedule`] then picks the highest-priority runnable task.
//! Ties are broken by scanning the task array starting just after the
//! current task, so equal-priority peers take turns.
//!
//! The idle task is created by [`Scheduler::prepare_start`] at
//! `IDLE_PRIORITY` and is always runnable, so there is always something to
//! run once the scheduler has started.

use core::fmt;

use crate::config::{IDLE_PRIORITY, MAX_PRIORITIES, MAX_QUEUES, MAX_TASKS, MIN_STACK_WORDS};
use crate::queue::{Queue, QueueError, QueueHandle};
use crate::task::{
    StackWord, TaskControlBlock, TaskEntry, TaskHandle, TaskSpec, TaskState, Wait, STACK_FILL,
};
use crate::time::Ticks;

/// Errors reported by task creation and scheduler start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The task array is full.
    TooManyTasks,
    /// Priority is not below `MAX_PRIORITIES`.
    InvalidPriority(u8),
    /// The stack cannot hold the initial frame plus a minimal working area.
    StackTooSmall { required: usize, provided: usize },
    /// The application declined to provide memory for the idle task.
    IdleMemoryUnavailable,
    /// The scheduler has already been started.
    AlreadyStarted,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::TooManyTasks => f.write_str("task array is full"),
            KernelError::InvalidPriority(p) => write!(f, "invalid task priority {}", p),
            KernelError::StackTooSmall { required, provided } => write!(
                f,
                "stack too small: {} words required, {} provided",
                required, provided
            ),
            KernelError::IdleMemoryUnavailable => f.write_str("no memory for the idle task"),
            KernelError::AlreadyStarted => f.write_str("scheduler already started"),
        }
    }
}

const NO_QUEUE: Option<Queue<'static>> = None;

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state. Holds all task control blocks, the queue
/// arena and the tick count. The firmware's instance lives in a
/// [`Shared`](crate::sync::Shared) cell in `kernel.rs`.
pub struct Scheduler {
    /// Fixed-size array of TCBs. The first `task_count` entries are in use.
    pub tasks: [TaskControlBlock; MAX_TASKS],

    /// Number of allocated tasks (including the idle task once started).
    pub task_count: usize,

    /// Index of the currently running task.
    pub current_task: usize,

    /// Queue arena. The first `queue_count` entries are in use.
    queues: [Option<Queue<'static>>; MAX_QUEUES],

    queue_count: usize,

    /// Monotonic tick counter.
    pub tick_count: Ticks,

    /// Set when a context switch should happen at the next opportunity.
    pub needs_reschedule: bool,

    /// The idle task, once the scheduler has started.
    idle_task: Option<TaskHandle>,
}

impl Scheduler {
    /// Creates an empty scheduler. `const` so it can initialize a `static`.
    pub const fn new() -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; MAX_TASKS],
            task_count: 0,
            current_task: 0,
            queues: [NO_QUEUE; MAX_QUEUES],
            queue_count: 0,
            tick_count: 0,
            needs_reschedule: false,
            idle_task: None,
        }
    }

    /// Register a new task with the scheduler.
    ///
    /// The stack is filled with [`STACK_FILL`] and an initial exception
    /// frame is laid down at its top, so that the first context switch into
    /// the task "returns" into `spec.entry(spec.param)`.
    pub fn create_task(&mut self, spec: TaskSpec) -> Result<TaskHandle, KernelError> {
        if spec.priority >= MAX_PRIORITIES {
            return Err(KernelError::InvalidPriority(spec.priority));
        }
        if spec.stack.len() < MIN_STACK_WORDS {
            return Err(KernelError::StackTooSmall {
                required: MIN_STACK_WORDS,
                provided: spec.stack.len(),
            });
        }
        if self.task_count >= MAX_TASKS {
            return Err(KernelError::TooManyTasks);
        }

        let TaskSpec {
            name,
            entry,
            stack,
            priority,
            param,
        } = spec;

        let id = self.task_count;
        let frame = init_task_stack(stack, entry, param);

        let tcb = &mut self.tasks[id];
        tcb.init(id, name, priority, stack);
        // Safety: init_task_stack returns an index inside the stack.
        tcb.stack_pointer = unsafe { tcb.stack_base.add(frame) };

        self.task_count += 1;
        Ok(TaskHandle::new(id))
    }

    /// Register a queue over `storage`.
    pub fn create_queue(
        &mut self,
        capacity: usize,
        item_size: usize,
        storage: &'static mut [u8],
    ) -> Result<QueueHandle, QueueError> {
        if self.queue_count >= MAX_QUEUES {
            return Err(QueueError::TooManyQueues);
        }
        let queue = Queue::new(capacity, item_size, storage)?;

        let handle = QueueHandle::new(self.queue_count);
        self.queues[self.queue_count] = Some(queue);
        self.queue_count += 1;
        Ok(handle)
    }

    /// Creates the idle task on `idle_stack` and selects the first task to
    /// run.
    ///
    /// Fails if the application provided no idle memory or the task array
    /// has no slot left for the idle task.
    pub fn prepare_start(
        &mut self,
        idle_entry: TaskEntry,
        idle_stack: Option<&'static mut [StackWord]>,
    ) -> Result<TaskHandle, KernelError> {
        if self.idle_task.is_some() {
            return Err(KernelError::AlreadyStarted);
        }
        let stack = idle_stack.ok_or(KernelError::IdleMemoryUnavailable)?;

        let idle = self.create_task(TaskSpec {
            name: "idle",
            entry: idle_entry,
            stack,
            priority: IDLE_PRIORITY,
            param: 0,
        })?;
        self.idle_task = Some(idle);

        // Start the round-robin scan from the first task.
        self.current_task = idle.index();
        Ok(self.schedule().unwrap_or(idle))
    }

    /// The idle task, once started.
    pub fn idle_task(&self) -> Option<TaskHandle> {
        self.idle_task
    }

    /// The task currently holding the CPU.
    pub fn current(&self) -> TaskHandle {
        TaskHandle::new(self.current_task)
    }

    /// Looks up an allocated task.
    pub fn task(&self, handle: TaskHandle) -> Option<&TaskControlBlock> {
        self.tasks[..self.task_count].get(handle.index())
    }

    /// Looks up a created queue.
    pub fn queue(&self, handle: QueueHandle) -> Option<&Queue<'static>> {
        self.queues[..self.queue_count]
            .get(handle.index())
            .and_then(Option::as_ref)
    }

    fn queue_mut(&mut self, handle: QueueHandle) -> Result<&mut Queue<'static>, QueueError> {
        self.queues[..self.queue_count]
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .ok_or(QueueError::InvalidHandle)
    }

    /// Stack words the task has never touched.
    pub fn stack_high_water_mark(&self, handle: TaskHandle) -> Option<usize> {
        self.task(handle).map(TaskControlBlock::stack_high_water_mark)
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Called from the SysTick handler every tick.
    ///
    /// Wakes tasks whose deadline has arrived and returns whether a context
    /// switch is needed.
    pub fn tick(&mut self) -> bool {
        self.tick_count += 1;
        let now = self.tick_count;

        for tcb in self.tasks[..self.task_count].iter_mut() {
            if !tcb.active || tcb.state != TaskState::Blocked {
                continue;
            }
            if let Some(deadline) = tcb.wait.deadline() {
                if deadline <= now {
                    if let Wait::Queue { .. } = tcb.wait {
                        tcb.timed_out = true;
                    }
                    tcb.unblock();
                }
            }
        }

        if self.ready_contender_exists() {
            self.needs_reschedule = true;
        }
        self.needs_reschedule
    }

    /// Whether some other ready task should get the CPU: one of at least the
    /// running task's priority, or any at all if nothing is running.
    fn ready_contender_exists(&self) -> bool {
        let current = &self.tasks[self.current_task];
        let running = current.active && current.state == TaskState::Running;

        self.tasks[..self.task_count]
            .iter()
            .enumerate()
            .any(|(i, t)| {
                i != self.current_task
                    && t.active
                    && t.state == TaskState::Ready
                    && (!running || t.priority >= current.priority)
            })
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Select the next task to run and mark it Running.
    ///
    /// Picks the highest-priority runnable task. Among equals, the first one
    /// found scanning forward from the task after the current one wins, which
    /// makes equal-priority tasks take turns. Returns `None` only if no task
    /// is runnable, which cannot happen once the idle task exists.
    pub fn schedule(&mut self) -> Option<TaskHandle> {
        let n = self.task_count;
        let mut best: Option<usize> = None;

        for offset in 1..=n {
            let i = (self.current_task + offset) % n;
            let tcb = &self.tasks[i];
            if !tcb.is_runnable() {
                continue;
            }
            match best {
                Some(b) if self.tasks[b].priority >= tcb.priority => {}
                _ => best = Some(i),
            }
        }

        let next = best?;

        let prev = self.current_task;
        if prev < n && self.tasks[prev].state == TaskState::Running {
            self.tasks[prev].state = TaskState::Ready;
        }
        self.tasks[next].state = TaskState::Running;
        self.current_task = next;
        self.needs_reschedule = false;

        Some(TaskHandle::new(next))
    }

    /// Records the outgoing task's stack pointer. Called from PendSV.
    pub fn save_context(&mut self, stack_pointer: *mut StackWord) {
        if self.current_task < self.task_count {
            self.tasks[self.current_task].stack_pointer = stack_pointer;
        }
    }

    /// Returns the stack pointer to resume from, picking a new task first if
    /// a reschedule is pending or the current task can no longer run. Called
    /// from PendSV.
    ///
    /// The first switch after start finds the task chosen by
    /// [`prepare_start`](Self::prepare_start) already Running and keeps it.
    pub fn switch_context(&mut self) -> *mut StackWord {
        if self.needs_reschedule || self.tasks[self.current_task].state != TaskState::Running {
            self.schedule();
        }
        self.tasks[self.current_task].stack_pointer
    }

    // -----------------------------------------------------------------------
    // Blocking
    // -----------------------------------------------------------------------

    /// Blocks the current task on `wait`.
    ///
    /// Returns `false`, leaving the task runnable, if there is nothing to wait
    /// for: `Wait::None`, or a deadline that has already passed.
    pub fn block_current(&mut self, wait: Wait) -> bool {
        if wait == Wait::None {
            return false;
        }
        if let Some(deadline) = wait.deadline() {
            if deadline <= self.tick_count {
                return false;
            }
        }

        let tcb = &mut self.tasks[self.current_task];
        tcb.state = TaskState::Blocked;
        tcb.wait = wait;
        tcb.timed_out = false;
        self.needs_reschedule = true;
        true
    }

    /// One attempt of a blocking receive on behalf of the current task.
    ///
    /// Copies an item into `out` and returns `Ok(true)`, or blocks the task
    /// on the queue until `deadline` and returns `Ok(false)`; the caller must
    /// then yield and call again once resumed. A wait that expired, or a
    /// deadline that has already passed, yields `Err(QueueError::TimedOut)`.
    pub fn receive_or_block(
        &mut self,
        queue: QueueHandle,
        out: &mut [u8],
        deadline: Option<Ticks>,
    ) -> Result<bool, QueueError> {
        match self.try_receive(queue, out) {
            Ok(()) => {
                self.take_timeout();
                Ok(true)
            }
            Err(QueueError::Empty) => {
                if self.take_timeout() {
                    return Err(QueueError::TimedOut);
                }
                if self.block_current(Wait::Queue { queue, deadline }) {
                    Ok(false)
                } else {
                    Err(QueueError::TimedOut)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Returns and clears the current task's timed-out flag.
    pub fn take_timeout(&mut self) -> bool {
        core::mem::replace(&mut self.tasks[self.current_task].timed_out, false)
    }

    // -----------------------------------------------------------------------
    // Queue operations
    // -----------------------------------------------------------------------

    /// Non-blocking send. On success, readies the highest-priority task
    /// blocked receiving on `queue` (lowest index among equals).
    pub fn try_send(&mut self, queue: QueueHandle, item: &[u8]) -> Result<(), QueueError> {
        self.queue_mut(queue)?.try_send(item)?;
        self.wake_receiver(queue);
        Ok(())
    }

    /// Non-blocking receive into `out`.
    pub fn try_receive(&mut self, queue: QueueHandle, out: &mut [u8]) -> Result<(), QueueError> {
        self.queue_mut(queue)?.try_receive(out)
    }

    fn wake_receiver(&mut self, queue: QueueHandle) {
        let mut waiter: Option<usize> = None;
        for (i, tcb) in self.tasks[..self.task_count].iter().enumerate() {
            if !tcb.is_waiting_on(queue) {
                continue;
            }
            match waiter {
                Some(w) if self.tasks[w].priority >= tcb.priority => {}
                _ => waiter = Some(i),
            }
        }

        if let Some(w) = waiter {
            self.tasks[w].unblock();
            let current = &self.tasks[self.current_task];
            if current.state != TaskState::Running || self.tasks[w].priority > current.priority {
                self.needs_reschedule = true;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stack initialization helper
// ---------------------------------------------------------------------------

/// Words in the initial frame: 8 software-saved plus 8 hardware-stacked.
pub const FRAME_WORDS: usize = 16;

/// Initial xPSR: only the Thumb bit set.
const INITIAL_XPSR: StackWord = 0x0100_0000;

/// Fills `stack` with [`STACK_FILL`] and builds the frame the first context
/// switch will unstack. Returns the word index of the frame, which becomes
/// the task's initial stack pointer.
///
/// ## Stack Layout (top = high address, growing down)
///
/// ```text
/// [Hardware stacked frame]
///   xPSR  (Thumb bit set)
///   PC    (task entry point)
///   LR    (task_exit)
///   R12   (0)
///   R3    (0)
///   R2    (0)
///   R1    (0)
///   R0    (task parameter)
/// [Software saved context]
///   R11   (0)
///   ...
///   R4    (0)              <- stack_pointer after init
/// ```
fn init_task_stack(stack: &mut [StackWord], entry: TaskEntry, param: usize) -> usize {
    stack.fill(STACK_FILL);

    // Align the top to 8 bytes (AAPCS requirement).
    let base = stack.as_ptr() as usize;
    let aligned_top = (base + stack.len() * core::mem::size_of::<StackWord>()) & !0x07;
    let top = (aligned_top - base) / core::mem::size_of::<StackWord>();
    let frame = top - FRAME_WORDS;

    for word in stack[frame..frame + 8].iter_mut() {
        *word = 0; // R4-R11
    }
    stack[frame + 8] = param as StackWord; // R0
    stack[frame + 9] = 0; // R1
    stack[frame + 10] = 0; // R2
    stack[frame + 11] = 0; // R3
    stack[frame + 12] = 0; // R12
    stack[frame + 13] = task_exit as usize as StackWord; // LR
    stack[frame + 14] = (entry as usize as StackWord) & !1; // PC
    stack[frame + 15] = INITIAL_XPSR;

    frame
}

/// Landing pad for a task that returns. Entry points are `-> !`, so this
/// only runs if one is lying.
extern "C" fn task_exit() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}
