//! # Bootstrap
//!
//! Brings the hardware up, builds the queue and the two LED tasks, and
//! hands the CPU to the scheduler. Every step is fatal: the first failure
//! is returned and nothing after it runs.
//!
//! The port is moved in and always ends up in the caller's [`PortSlot`].
//! Once the scheduler runs the Consumer takes it from there; if boot fails
//! no task has run and the caller takes it back for the failure flash.

use core::convert::Infallible;
use core::fmt;

use crate::app::{self, consumer_task, producer_task, Message};
use crate::config::{
    BOOT_FLASH_MS, BOOT_FLASH_TOGGLES, FLASH_MASK, LED_MASK, LED_TASK_PRIORITY, QUEUE_LENGTH,
};
use crate::hal::{HardwarePort, PortError, PortSlot};
use crate::kernel::Rtos;
use crate::queue::{Item, QueueError};
use crate::scheduler::KernelError;
use crate::task::{StackWord, TaskSpec};

/// Static memory handed over at boot.
pub struct BootMemory {
    pub queue_storage: &'static mut [u8],
    pub producer_stack: &'static mut [StackWord],
    pub consumer_stack: &'static mut [StackWord],
}

/// Why the system did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// Watchdog or clock setup failed.
    Hardware(PortError),
    /// The queue could not be created. No task exists yet.
    Channel(QueueError),
    /// A task could not be created.
    Task(KernelError),
    /// The scheduler returned instead of running the tasks.
    Scheduler(KernelError),
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::Hardware(e) => write!(f, "hardware setup: {}", e),
            BootError::Channel(e) => write!(f, "queue creation: {}", e),
            BootError::Task(e) => write!(f, "task creation: {}", e),
            BootError::Scheduler(e) => write!(f, "scheduler start: {}", e),
        }
    }
}

impl From<PortError> for BootError {
    fn from(e: PortError) -> Self {
        BootError::Hardware(e)
    }
}

impl From<QueueError> for BootError {
    fn from(e: QueueError) -> Self {
        BootError::Channel(e)
    }
}

/// Runs the boot sequence. On success the scheduler never gives the CPU
/// back, so this only returns on failure.
pub fn boot<R: Rtos, P: HardwarePort>(
    rtos: &mut R,
    mut port: P,
    slot: &PortSlot<P>,
    memory: BootMemory,
) -> Result<Infallible, BootError> {
    let prepared = prepare(rtos, &mut port, memory);
    slot.put(port);
    prepared?;

    let never = rtos.start_scheduler().map_err(BootError::Scheduler)?;
    match never {}
}

/// Every step before the scheduler starts.
fn prepare<R: Rtos, P: HardwarePort>(
    rtos: &mut R,
    port: &mut P,
    memory: BootMemory,
) -> Result<(), BootError> {
    port.configure_watchdog()?;
    port.configure_clock()?;
    port.set_pin_direction(LED_MASK);

    let queue = rtos.create_channel(QUEUE_LENGTH, Message::SIZE, memory.queue_storage)?;

    rtos.create_task(TaskSpec {
        name: "producer",
        entry: producer_task,
        stack: memory.producer_stack,
        priority: LED_TASK_PRIORITY,
        param: queue.into_param(),
    })
    .map_err(BootError::Task)?;

    rtos.create_task(TaskSpec {
        name: "consumer",
        entry: consumer_task,
        stack: memory.consumer_stack,
        priority: LED_TASK_PRIORITY,
        param: queue.into_param(),
    })
    .map_err(BootError::Task)?;

    log::info!("boot: queue and tasks ready");
    app::flash(port, FLASH_MASK, BOOT_FLASH_TOGGLES, BOOT_FLASH_MS);
    Ok(())
}
