//! # qblink
//!
//! Two tasks blinking LEDs through a one-slot queue, on a small preemptive
//! priority scheduler for ARM Cortex-M4.
//!
//! ## Overview
//!
//! A Producer task wakes every `BLINK_PERIOD`, flips a bit pattern and
//! offers it to the queue without blocking. A Consumer task of the same
//! priority blocks on the queue and writes whatever arrives to the output
//! pins. When both are blocked the kernel's idle task runs the idle policy:
//! sleep until the next interrupt, or count idle passes.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │              Application (app.rs, boot.rs)              │
//! │   Producer · Consumer · boot flash · IdleHook (idle.rs) │
//! ├──────────────────────────┬─────────────────────────────┤
//! │  Kernel API (kernel.rs)  │   Hardware Port (hal.rs)    │
//! │  Rtos · KernelHooks      │   HardwarePort · Power      │
//! │  sleep · send · receive  │   Board (board.rs)          │
//! ├──────────────────────────┴─────────────────────────────┤
//! │  Scheduler (scheduler.rs)   · Queue (queue.rs)          │
//! │  tick() · schedule() · block/wake · receive_or_block    │
//! ├────────────────────────────────────────────────────────┤
//! │  Task model (task.rs) · Time (time.rs) · Sync (sync.rs) │
//! ├────────────────────────────────────────────────────────┤
//! │         Arch Port (arch/cortex_m4.rs)                   │
//! │         PendSV · SysTick · first-task launch · WFI      │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: stacks and queue storage are `static`s handed to the
//!   kernel as `&'static mut`
//! - **Fixed arenas**: `MAX_TASKS` TCBs and `MAX_QUEUES` queues, addressed by
//!   index handles
//! - **Critical sections**: all scheduler state sits behind one
//!   `critical_section::Mutex`
//!
//! Everything above the arch port is plain Rust and unit-tested on the host;
//! `cargo test` links the `critical-section` crate's `std` implementation.

#![cfg_attr(not(test), no_std)]

pub mod app;
pub mod arch;
pub mod board;
pub mod boot;
pub mod config;
pub mod hal;
pub mod idle;
pub mod kernel;
pub mod logging;
pub mod queue;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod time;

#[cfg(test)]
mod testing;
