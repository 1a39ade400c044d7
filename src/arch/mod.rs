//! # Architecture Abstraction Layer
//!
//! Provides the hardware boundary underneath the scheduler: tick timer,
//! context switch and the processor's sleep instruction. Only the
//! Cortex-M4 port exists.

pub mod cortex_m4;

pub use cortex_m4::{configure_systick, start_first_task, trigger_pendsv, CortexM4};
