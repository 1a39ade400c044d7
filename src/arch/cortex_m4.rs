//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, SysTick timer configuration,
//! and interrupt management.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by `main` until the scheduler starts,
//!   and by every exception handler afterwards
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry, the hardware stacks R0-R3, R12, LR, PC and xPSR onto
//! the process stack. The PendSV handler saves and restores R4-R11, which
//! completes the context.
//!
//! The first task is launched through the same path: PSP is zeroed before
//! PendSV is pended, and the handler skips the save step when it sees a null
//! PSP. Returning with `EXC_RETURN = 0xFFFF_FFFD` drops into Thread mode on
//! the process stack, unstacking the frame built by
//! `Scheduler::create_task`.
//!
//! ## Interrupt Priorities
//!
//! SysTick and PendSV both run at the lowest priority, so a context switch
//! never preempts another handler and SysTick never preempts PendSV.
//!
//! The handlers and the assembly only exist for bare-metal ARM builds. On
//! any other target the functions here still compile, so the pure parts of
//! the crate can be unit-tested on the host, but they must not be called.

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::hal::PowerControl;
use crate::kernel;
use crate::task::StackWord;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// SysTick reload value for `TICK_HZ` at `SYSTEM_CLOCK_HZ`.
pub const SYSTICK_RELOAD: u32 = SYSTEM_CLOCK_HZ / TICK_HZ - 1;

/// Configure the SysTick timer for the scheduler tick.
///
/// Counts the processor clock and interrupts every `SYSTICK_RELOAD + 1`
/// cycles.
pub fn configure_systick(syst: &mut SYST) {
    syst.set_reload(SYSTICK_RELOAD);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Request a context switch.
///
/// Sets PENDSVSET in ICSR. From Thread mode with interrupts enabled the
/// switch happens before the next instruction; inside a critical section or
/// a handler it happens once those end.
#[inline]
pub fn trigger_pendsv() {
    SCB::set_pendsv();
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// System Handler Priority Register 3.
const SHPR3: *mut u32 = 0xE000_ED20 as *mut u32;

/// Set PendSV and SysTick to the lowest interrupt priority.
fn set_interrupt_priorities() {
    // Safety: SHPR3 is a core register present on every Cortex-M4. Bits
    // [23:16] hold the PendSV priority, bits [31:24] the SysTick priority.
    unsafe {
        let val = core::ptr::read_volatile(SHPR3);
        core::ptr::write_volatile(SHPR3, val | (0xFF << 16) | (0xFF << 24));
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Hand the CPU to the scheduler. **Does not return.**
///
/// Interrupts stay masked until PSP is cleared and SysTick is running, so
/// no tick or switch can observe a half-started kernel.
///
/// # Safety
/// Must be called once, from `main`, after `Scheduler::prepare_start` has
/// selected a first task. The caller's stack is abandoned.
pub unsafe fn start_first_task(syst: &mut SYST) -> ! {
    cortex_m::interrupt::disable();

    // A null PSP tells PendSV there is no outgoing context to save.
    cortex_m::register::psp::write(0);
    set_interrupt_priorities();
    configure_systick(syst);

    SCB::set_pendsv();
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
    cortex_m::interrupt::enable();

    // PendSV is taken as soon as interrupts are on.
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

// 1. Skip the save when PSP is null (first switch)
// 2. Push R4-R11 onto the outgoing task's stack and record the new PSP
// 3. Ask the scheduler for the incoming task's PSP
// 4. Pop R4-R11 from it and return to Thread mode on PSP
#[cfg(all(target_arch = "arm", target_os = "none"))]
core::arch::global_asm!(
    ".section .text.PendSV,\"ax\",%progbits",
    ".global PendSV",
    ".type PendSV,%function",
    ".thumb_func",
    "PendSV:",
    "    cpsid i",
    "    mrs r0, psp",
    "    cbz r0, 1f",
    "    stmdb r0!, {{r4-r11}}",
    "    bl qblink_save_context",
    "1:",
    "    bl qblink_switch_context",
    "    ldmia r0!, {{r4-r11}}",
    "    msr psp, r0",
    "    cpsie i",
    "    mvn r0, #2",
    "    bx r0",
    ".size PendSV, . - PendSV",
);

/// Store the outgoing task's stack pointer. Called from PendSV.
#[no_mangle]
extern "C" fn qblink_save_context(stack_pointer: *mut StackWord) {
    kernel::with_scheduler(|s| s.save_context(stack_pointer));
}

/// Pick the incoming task and return its stack pointer. Called from PendSV.
#[no_mangle]
extern "C" fn qblink_switch_context() -> *mut StackWord {
    kernel::with_scheduler(|s| s.switch_context())
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// Scheduler tick entry point. Runs at `TICK_HZ`.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[cortex_m_rt::exception]
fn SysTick() {
    if kernel::with_scheduler(|s| s.tick()) {
        trigger_pendsv();
    }
}

// ---------------------------------------------------------------------------
// Sleep
// ---------------------------------------------------------------------------

/// The core's wait-for-interrupt instruction.
#[derive(Debug, Clone, Copy, Default)]
pub struct CortexM4;

impl PowerControl for CortexM4 {
    #[inline]
    fn wait_for_interrupt(&self) {
        cortex_m::asm::wfi();
    }
}
