//! # qblink Configuration
//!
//! Compile-time constants governing the kernel and the blinker application.
//! All limits are fixed at compile time, there is no dynamic allocation.
//!
//! Build variants are selected with Cargo features rather than by editing
//! this file:
//!
//! | Feature | Effect |
//! |---------|--------|
//! | `idle-diagnostic` | Idle hook counts loops instead of sleeping |
//! | `relative-delay` | Producer sleeps `BLINK_PERIOD` after each publish instead of keeping a drift-free cadence |
//! | `semihosting` | `log` output goes to the debugger console |

use crate::idle::IdlePolicy;
use crate::time::{ms_to_ticks, CadencePolicy, Ticks, Timeout};

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// Maximum number of tasks, including the idle task.
pub const MAX_TASKS: usize = 4;

/// Maximum number of queues the kernel arena can hold.
pub const MAX_QUEUES: usize = 2;

/// Number of priority levels. Valid priorities are `0..MAX_PRIORITIES`.
pub const MAX_PRIORITIES: u8 = 4;

/// Priority of the kernel's idle task. Always the lowest.
pub const IDLE_PRIORITY: u8 = 0;

/// SysTick frequency in Hz. One tick per millisecond.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (STM32F4 running from the 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Smallest stack the kernel accepts, in words. The initial exception frame
/// alone takes 16 words.
pub const MIN_STACK_WORDS: usize = 24;

/// Stack size for application tasks, in words.
pub const TASK_STACK_WORDS: usize = 256;

/// Stack size handed to the kernel for its idle task, in words.
pub const IDLE_STACK_WORDS: usize = 32;

/// Largest queue item the task-context API can copy, in bytes.
pub const MAX_ITEM_SIZE: usize = 8;

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Producer and Consumer share this priority. Equal priority is deliberate:
/// ordering relies on round-robin between peers, not on preemption.
pub const LED_TASK_PRIORITY: u8 = IDLE_PRIORITY + 1;

/// Slots in the LED queue.
pub const QUEUE_LENGTH: usize = 1;

/// Producer period.
pub const BLINK_PERIOD: Ticks = ms_to_ticks(100);

/// Output pins driven by the application.
pub const LED_MASK: u8 = 0x41;

/// Bits flipped by the Producer every period.
pub const LED_TOGGLE_MASK: u8 = 0x41;

/// Pattern the Producer starts from. The first published pattern is
/// `LED_INITIAL ^ LED_TOGGLE_MASK`.
pub const LED_INITIAL: u8 = 0x40;

/// Pin toggled by the boot flash and the failure flash.
pub const FLASH_MASK: u8 = 0x40;

/// Toggles in the failure flash.
pub const FAST_FLASH_TOGGLES: u32 = 20;

/// Toggles in the boot flash. Even, so the pin ends where it started.
pub const BOOT_FLASH_TOGGLES: u32 = 4;

/// How long each LED state lasts in the boot flash.
pub const BOOT_FLASH_MS: u32 = 150;

/// How long each LED state lasts in the failure flash.
pub const FAST_FLASH_MS: u32 = 50;

/// Core clock cycles in `ms` milliseconds.
pub const fn ms_to_cycles(ms: u32) -> u32 {
    SYSTEM_CLOCK_HZ / 1000 * ms
}

/// How long the Consumer waits for a message before reporting a liveness
/// anomaly.
pub const RECEIVE_TIMEOUT: Timeout = Timeout::Forever;

/// The Consumer logs its stack headroom once every this many patterns.
pub const STACK_REPORT_INTERVAL: u32 = 100;

/// Idle strategy for this build.
pub const IDLE_POLICY: IdlePolicy = if cfg!(feature = "idle-diagnostic") {
    IdlePolicy::Diagnostic
} else {
    IdlePolicy::LowPower
};

/// Producer delay policy for this build.
pub const CADENCE_POLICY: CadencePolicy = if cfg!(feature = "relative-delay") {
    CadencePolicy::Relative
} else {
    CadencePolicy::Periodic
};
