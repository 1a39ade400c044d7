//! # Task Control Block
//!
//! Defines the task model for the kernel. A task is an entry function that
//! never returns, a statically reserved stack, a fixed priority and one
//! word of parameter. Tasks are created once at boot and live forever.

use core::fmt;

use crate::queue::QueueHandle;
use crate::time::Ticks;

/// One word of task stack.
pub type StackWord = u32;

/// Task entry point. Receives the parameter given at creation and never
/// returns.
pub type TaskEntry = extern "C" fn(usize) -> !;

/// Value written over a fresh stack so that untouched words can be counted.
pub const STACK_FILL: StackWord = 0xA5A5_A5A5;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task in the scheduler's state machine.
///
/// ```text
///   ┌──────────┐     schedule()      ┌─────────┐
///   │  Ready   │ ──────────────────► │ Running │
///   └──────────┘ ◄────────────────── └─────────┘
///        ▲          time slice            │
///        │                                │ block_current()
///        │                                ▼
///        │   deadline / queue send   ┌─────────┐
///        └────────────────────────── │ Blocked │
///                                    └─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Task is ready to run and waiting for the CPU.
    Ready,
    /// Task is currently executing on the CPU.
    Running,
    /// Task is waiting for a deadline or for queue data.
    Blocked,
}

/// What a blocked task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Not waiting.
    None,
    /// Sleeping until the tick count reaches this value.
    Until(Ticks),
    /// Waiting for an item on `queue`, optionally giving up at `deadline`.
    Queue {
        queue: QueueHandle,
        deadline: Option<Ticks>,
    },
}

impl Wait {
    /// Tick at which the wait expires, if any.
    pub fn deadline(&self) -> Option<Ticks> {
        match *self {
            Wait::None => None,
            Wait::Until(t) => Some(t),
            Wait::Queue { deadline, .. } => deadline,
        }
    }
}

/// Identifies a task in the kernel arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle(u8);

impl TaskHandle {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u8)
    }

    /// Arena index of this task.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Task creation request
// ---------------------------------------------------------------------------

/// Everything the kernel needs to create a task.
pub struct TaskSpec {
    /// Name for diagnostics.
    pub name: &'static str,
    /// Entry function.
    pub entry: TaskEntry,
    /// Stack memory, handed over to the kernel for good.
    pub stack: &'static mut [StackWord],
    /// Priority, `0..MAX_PRIORITIES`. Higher runs first.
    pub priority: u8,
    /// Passed to `entry` in its first argument register.
    pub param: usize,
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("stack_words", &self.stack.len())
            .field("priority", &self.priority)
            .field("param", &self.param)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB). Stored in a fixed array inside the scheduler.
///
/// The stack itself lives wherever the creator put it (normally a
/// `static`); the TCB records its base and length and the saved stack
/// pointer, which points into it.
pub struct TaskControlBlock {
    /// Index in the scheduler's task array.
    pub id: usize,

    /// Diagnostic name.
    pub name: &'static str,

    /// Current execution state.
    pub state: TaskState,

    /// Fixed priority. Higher values run first.
    pub priority: u8,

    /// What the task is blocked on.
    pub wait: Wait,

    /// Set when a queue wait expired instead of receiving data. Cleared by
    /// `Scheduler::take_timeout`.
    pub timed_out: bool,

    /// Saved process stack pointer. Updated on every context switch.
    pub stack_pointer: *mut StackWord,

    /// Lowest address of the task's stack.
    pub stack_base: *mut StackWord,

    /// Stack length in words.
    pub stack_words: usize,

    /// Whether this slot is allocated.
    pub active: bool,
}

// Safety: the raw pointers only ever point into the task's own 'static
// stack, and TCBs are only touched inside critical sections.
unsafe impl Send for TaskControlBlock {}

impl fmt::Debug for TaskControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskControlBlock")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("wait", &self.wait)
            .finish()
    }
}

impl TaskControlBlock {
    /// An unallocated slot. Used to initialize the static array.
    pub const EMPTY: Self = Self {
        id: 0,
        name: "",
        state: TaskState::Blocked,
        priority: 0,
        wait: Wait::None,
        timed_out: false,
        stack_pointer: core::ptr::null_mut(),
        stack_base: core::ptr::null_mut(),
        stack_words: 0,
        active: false,
    };

    /// Claims this slot for a new task. The stack frame is laid down
    /// separately by the scheduler.
    pub fn init(
        &mut self,
        id: usize,
        name: &'static str,
        priority: u8,
        stack: &'static mut [StackWord],
    ) {
        self.id = id;
        self.name = name;
        self.state = TaskState::Ready;
        self.priority = priority;
        self.wait = Wait::None;
        self.timed_out = false;
        self.stack_words = stack.len();
        self.stack_base = stack.as_mut_ptr();
        self.stack_pointer = self.stack_base;
        self.active = true;
    }

    /// Ready or already running.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.active && matches!(self.state, TaskState::Ready | TaskState::Running)
    }

    /// Blocked on `queue`.
    #[inline]
    pub fn is_waiting_on(&self, queue: QueueHandle) -> bool {
        self.active
            && self.state == TaskState::Blocked
            && matches!(self.wait, Wait::Queue { queue: q, .. } if q == queue)
    }

    /// Moves a blocked task back to Ready.
    pub fn unblock(&mut self) {
        self.state = TaskState::Ready;
        self.wait = Wait::None;
    }

    /// Number of stack words, counted from the bottom, that still hold
    /// [`STACK_FILL`]. A task that has come close to overflowing its stack
    /// reports a value near zero.
    pub fn stack_high_water_mark(&self) -> usize {
        if self.stack_base.is_null() {
            return 0;
        }
        // Safety: stack_base/stack_words describe a 'static slice handed to
        // the kernel at creation; reading it is fine even while the task
        // runs, since we only compare words.
        let stack = unsafe { core::slice::from_raw_parts(self.stack_base, self.stack_words) };
        stack.iter().take_while(|&&w| w == STACK_FILL).count()
    }
}
