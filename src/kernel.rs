//! # Kernel
//!
//! The global scheduler instance, the interface application code uses to
//! set the system up ([`Rtos`]), and the calls tasks make once it runs.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset handler (cortex-m-rt)
//!   └─► main()
//!         ├─► Kernel::new(SYST)
//!         ├─► Rtos::create_channel()   ← Register queues
//!         ├─► Rtos::create_task()      ← Register tasks (×N)
//!         └─► Rtos::start_scheduler()  ← Returns only on failure
//!               ├─► Create idle task from KernelHooks::idle_task_memory()
//!               ├─► Configure SysTick (interrupts masked)
//!               └─► Pend the first context switch
//! ```
//!
//! ## Task-context API
//!
//! Tasks reach the kernel through [`TaskContext`]: `tick_count`,
//! `sleep_until`, `try_send`, `receive` and `stack_high_water_mark`. On the
//! core the context is [`CurrentTask`], which updates the scheduler inside a
//! critical section and, if the caller blocked or woke a more important
//! task, pends PendSV.

use core::convert::Infallible;
use core::marker::PhantomData;

use cortex_m::peripheral::SYST;

use crate::arch;
use crate::config::MAX_ITEM_SIZE;
use crate::queue::{Item, QueueError, QueueHandle};
use crate::scheduler::{KernelError, Scheduler};
use crate::sync::Shared;
use crate::task::{StackWord, TaskHandle, TaskSpec, Wait};
use crate::time::{Ticks, Timeout};

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

static SCHEDULER: Shared<Scheduler> = Shared::new(Scheduler::new());

/// Runs `f` on the global scheduler inside a critical section.
pub(crate) fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    SCHEDULER.with(f)
}

// ---------------------------------------------------------------------------
// Setup interface
// ---------------------------------------------------------------------------

/// What the application needs from a scheduler to set itself up.
pub trait Rtos {
    /// Register a task. It becomes eligible to run once the scheduler starts.
    fn create_task(&mut self, spec: TaskSpec) -> Result<TaskHandle, KernelError>;

    /// Register a queue of `capacity` items of `item_size` bytes over
    /// `storage`.
    fn create_channel(
        &mut self,
        capacity: usize,
        item_size: usize,
        storage: &'static mut [u8],
    ) -> Result<QueueHandle, QueueError>;

    /// Start multitasking. Returns only if the scheduler could not start.
    fn start_scheduler(&mut self) -> Result<Infallible, KernelError>;
}

/// Application callbacks the kernel needs.
pub trait KernelHooks {
    /// Called repeatedly by the idle task. Must not block.
    fn idle_hook();

    /// Stack for the idle task. Called once at start; `None` makes the start
    /// fail.
    fn idle_task_memory() -> Option<&'static mut [StackWord]>;
}

/// Idle task body.
extern "C" fn idle_task<H: KernelHooks>(_: usize) -> ! {
    loop {
        H::idle_hook();
    }
}

/// The kernel on real hardware. Owns SysTick until the scheduler starts.
pub struct Kernel<H: KernelHooks> {
    syst: SYST,
    _hooks: PhantomData<H>,
}

impl<H: KernelHooks> Kernel<H> {
    pub fn new(syst: SYST) -> Self {
        Self {
            syst,
            _hooks: PhantomData,
        }
    }
}

impl<H: KernelHooks> Rtos for Kernel<H> {
    fn create_task(&mut self, spec: TaskSpec) -> Result<TaskHandle, KernelError> {
        let name = spec.name;
        let priority = spec.priority;
        let handle = with_scheduler(|s| s.create_task(spec))?;
        log::debug!(
            "task {} created: slot {}, priority {}",
            name,
            handle.index(),
            priority
        );
        Ok(handle)
    }

    fn create_channel(
        &mut self,
        capacity: usize,
        item_size: usize,
        storage: &'static mut [u8],
    ) -> Result<QueueHandle, QueueError> {
        let handle = with_scheduler(|s| s.create_queue(capacity, item_size, storage))?;
        log::debug!(
            "queue {} created: {} x {} bytes",
            handle.index(),
            capacity,
            item_size
        );
        Ok(handle)
    }

    fn start_scheduler(&mut self) -> Result<Infallible, KernelError> {
        let idle_stack = H::idle_task_memory();
        let first = with_scheduler(|s| s.prepare_start(idle_task::<H>, idle_stack))?;
        log::info!("scheduler starting with task slot {}", first.index());

        // Safety: prepare_start succeeded, so a first task is selected, and
        // it can only succeed once.
        unsafe { arch::start_first_task(&mut self.syst) }
    }
}

// ---------------------------------------------------------------------------
// Task-context API
// ---------------------------------------------------------------------------

fn item_buffer<T: Item>(buf: &mut [u8; MAX_ITEM_SIZE]) -> Result<&mut [u8], QueueError> {
    buf.get_mut(..T::SIZE).ok_or(QueueError::ItemTooLarge {
        size: T::SIZE,
        max: MAX_ITEM_SIZE,
    })
}

/// The kernel as seen by a running task.
///
/// Implementors provide scheduler access and the act of giving up the CPU.
/// The blocking calls are built on those two and shared by every
/// implementor.
pub trait TaskContext {
    /// Runs `f` on the scheduler, with the calling task as its current task.
    fn with_scheduler<R>(&mut self, f: impl FnOnce(&mut Scheduler) -> R) -> R;

    /// Let the scheduler switch to whatever it picks. Returns once the
    /// calling task holds the CPU again.
    fn switch_out(&mut self);

    /// Ticks since the scheduler started.
    fn tick_count(&mut self) -> Ticks {
        self.with_scheduler(|s| s.tick_count)
    }

    /// Block until the tick count reaches `deadline`. Returns immediately if
    /// it already has.
    fn sleep_until(&mut self, deadline: Ticks) {
        if self.with_scheduler(|s| s.block_current(Wait::Until(deadline))) {
            self.switch_out();
        }
    }

    /// Stack words the calling task has never touched.
    fn stack_high_water_mark(&mut self) -> Option<usize> {
        self.with_scheduler(|s| s.stack_high_water_mark(s.current()))
    }

    /// Copy `item` into `queue` without blocking.
    ///
    /// Fails with [`QueueError::Full`] if no slot is free. Wakes one task
    /// waiting on the queue; if it outranks the caller, the caller is
    /// preempted before this returns.
    fn try_send<T: Item>(&mut self, queue: QueueHandle, item: T) -> Result<(), QueueError> {
        let mut buf = [0u8; MAX_ITEM_SIZE];
        let bytes = item_buffer::<T>(&mut buf)?;
        item.encode(bytes);

        let preempt =
            self.with_scheduler(|s| s.try_send(queue, bytes).map(|()| s.needs_reschedule))?;
        if preempt {
            self.switch_out();
        }
        Ok(())
    }

    /// Take the oldest item from `queue`, blocking for up to `timeout`.
    ///
    /// `Timeout::Immediate` never blocks and reports an empty queue as
    /// [`QueueError::Empty`]; a wait that runs out reports
    /// [`QueueError::TimedOut`].
    fn receive<T: Item>(
        &mut self,
        queue: QueueHandle,
        timeout: Timeout,
    ) -> Result<T, QueueError> {
        let mut buf = [0u8; MAX_ITEM_SIZE];
        let out = item_buffer::<T>(&mut buf)?;

        if timeout == Timeout::Immediate {
            self.with_scheduler(|s| s.try_receive(queue, out))?;
            return Ok(T::decode(out));
        }

        let deadline = self.with_scheduler(|s| timeout.deadline(s.tick_count));
        loop {
            if self.with_scheduler(|s| s.receive_or_block(queue, out, deadline))? {
                return Ok(T::decode(out));
            }
            self.switch_out();
        }
    }
}

/// The running task on the real core. PendSV performs the switch.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentTask;

impl TaskContext for CurrentTask {
    fn with_scheduler<R>(&mut self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        with_scheduler(f)
    }

    fn switch_out(&mut self) {
        arch::trigger_pendsv();
    }
}
