//! # Idle Policy
//!
//! What the idle task does each time it gets the CPU. The strategy is fixed
//! per build (`config::IDLE_POLICY`):
//!
//! - [`IdlePolicy::LowPower`] sleeps until the next interrupt. The SysTick
//!   that wakes it also drives the scheduler, so the idle task is preempted
//!   as soon as a task becomes ready.
//! - [`IdlePolicy::Diagnostic`] never sleeps and counts its loops instead,
//!   which shows how much slack the system has.
//!
//! The hook runs in the idle task with interrupts enabled and must never
//! block or log.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::hal::PowerControl;

/// Idle strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePolicy {
    LowPower,
    Diagnostic,
}

/// Idle hook state. Lives in a `static`.
#[derive(Debug)]
pub struct IdleHook {
    policy: IdlePolicy,
    loops: AtomicU32,
}

impl IdleHook {
    pub const fn new(policy: IdlePolicy) -> Self {
        Self {
            policy,
            loops: AtomicU32::new(0),
        }
    }

    /// One pass of the idle loop.
    pub fn run<P: PowerControl>(&self, power: &P) {
        match self.policy {
            IdlePolicy::LowPower => power.wait_for_interrupt(),
            IdlePolicy::Diagnostic => {
                // Wraps after 2^32 passes.
                self.loops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Idle passes so far. Always zero under `LowPower`.
    pub fn loops(&self) -> u32 {
        self.loops.load(Ordering::Relaxed)
    }
}
