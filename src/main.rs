//! # qblink Firmware
//!
//! Entry point for the STM32F407 build.
//!
//! | Task | Priority | Stack | Behavior |
//! |------|----------|-------|----------|
//! | `producer` | `LED_TASK_PRIORITY` | `TASK_STACK_WORDS` | Every 100 ms, flips `0x41` into the pattern and offers it to the queue |
//! | `consumer` | `LED_TASK_PRIORITY` | `TASK_STACK_WORDS` | Blocks on the queue, writes each pattern to GPIOD0-7 |
//! | `idle` | `IDLE_PRIORITY` | `IDLE_STACK_WORDS` | Sleeps until the next interrupt |
//!
//! The LEDs on PD0 and PD6 alternate. A boot failure is reported with 20
//! fast toggles of PD6, then the core halts.

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;
use static_cell::ConstStaticCell;

use qblink::app::{self, Message};
use qblink::board::Board;
use qblink::boot::{boot, BootMemory};
use qblink::config::{IDLE_STACK_WORDS, QUEUE_LENGTH, TASK_STACK_WORDS};
use qblink::kernel::{Kernel, KernelHooks};
use qblink::logging;
use qblink::queue::Item;
use qblink::task::StackWord;

// ---------------------------------------------------------------------------
// Static memory
// ---------------------------------------------------------------------------

static QUEUE_STORAGE: ConstStaticCell<[u8; QUEUE_LENGTH * Message::SIZE]> =
    ConstStaticCell::new([0; QUEUE_LENGTH * Message::SIZE]);

static PRODUCER_STACK: ConstStaticCell<[StackWord; TASK_STACK_WORDS]> =
    ConstStaticCell::new([0; TASK_STACK_WORDS]);

static CONSUMER_STACK: ConstStaticCell<[StackWord; TASK_STACK_WORDS]> =
    ConstStaticCell::new([0; TASK_STACK_WORDS]);

static IDLE_STACK: ConstStaticCell<[StackWord; IDLE_STACK_WORDS]> =
    ConstStaticCell::new([0; IDLE_STACK_WORDS]);

// ---------------------------------------------------------------------------
// Kernel hooks
// ---------------------------------------------------------------------------

struct Firmware;

impl KernelHooks for Firmware {
    fn idle_hook() {
        app::idle_hook();
    }

    fn idle_task_memory() -> Option<&'static mut [StackWord]> {
        IDLE_STACK.try_take().map(|stack| stack as &mut [StackWord])
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Firmware entry point. Boots the blinker and hands over to the scheduler.
/// Does not return.
#[entry]
fn main() -> ! {
    logging::init();

    let (Some(cp), Some(board)) = (cortex_m::Peripherals::take(), Board::take()) else {
        halt();
    };

    let mut kernel = Kernel::<Firmware>::new(cp.SYST);
    let memory = BootMemory {
        queue_storage: QUEUE_STORAGE.take(),
        producer_stack: PRODUCER_STACK.take(),
        consumer_stack: CONSUMER_STACK.take(),
    };

    match boot(&mut kernel, board, &app::LED_PORT, memory) {
        Ok(never) => match never {},
        Err(err) => {
            log::error!("boot failed: {}", err);
            // No task has run, so the board is still in the slot.
            if let Some(mut board) = app::LED_PORT.take() {
                app::flash_fast(&mut board);
            }
            halt()
        }
    }
}

fn halt() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}
