//! # LED Blinker Application
//!
//! Two tasks of equal priority joined by a one-slot queue:
//!
//! ```text
//!   ┌──────────┐  Message   ┌──────────────┐  Message   ┌──────────┐
//!   │ Producer │ ─────────► │ queue (1)    │ ─────────► │ Consumer │ ──► pins
//!   └──────────┘ try_send   └──────────────┘  receive   └──────────┘
//!     every BLINK_PERIOD      full: dropped              blocks until data
//! ```
//!
//! The Producer owns the pattern and never blocks on the queue; the Consumer
//! owns the output pins once the scheduler runs, having taken the board out
//! of [`LED_PORT`]. One pass of each task loop is a `step` method generic
//! over [`TaskContext`]; the `extern "C"` entry points run it on
//! [`CurrentTask`].

use crate::arch::CortexM4;
use crate::board::Board;
use crate::config::{
    ms_to_cycles, BLINK_PERIOD, CADENCE_POLICY, FAST_FLASH_MS, FAST_FLASH_TOGGLES, FLASH_MASK,
    IDLE_POLICY, LED_INITIAL, LED_TOGGLE_MASK, RECEIVE_TIMEOUT, STACK_REPORT_INTERVAL,
};
use crate::hal::{HardwarePort, PortSlot};
use crate::idle::IdleHook;
use crate::kernel::{CurrentTask, TaskContext};
use crate::queue::{Item, QueueError, QueueHandle};
use crate::time::{Cadence, CadencePolicy, Ticks, Timeout};

/// Idle hook state for the firmware build.
pub static IDLE: IdleHook = IdleHook::new(IDLE_POLICY);

/// Where the board waits between bootstrap and the Consumer.
pub static LED_PORT: PortSlot<Board> = PortSlot::new();

/// An output-pin pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message(pub u8);

impl Item for Message {
    const SIZE: usize = 1;

    fn encode(self, out: &mut [u8]) {
        out[0] = self.0;
    }

    fn decode(bytes: &[u8]) -> Self {
        Message(bytes[0])
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Pattern generator and publish bookkeeping.
#[derive(Debug)]
pub struct Producer {
    pattern: u8,
    mask: u8,
    cadence: Cadence,
    published: u32,
    dropped: u32,
}

impl Producer {
    /// A producer starting from `initial`, flipping `mask` each period. The
    /// cadence is anchored at `start`.
    pub fn new(initial: u8, mask: u8, policy: CadencePolicy, period: Ticks, start: Ticks) -> Self {
        Self {
            pattern: initial,
            mask,
            cadence: Cadence::new(policy, period, start),
            published: 0,
            dropped: 0,
        }
    }

    /// The firmware configuration.
    pub fn blinker(start: Ticks) -> Self {
        Self::new(LED_INITIAL, LED_TOGGLE_MASK, CADENCE_POLICY, BLINK_PERIOD, start)
    }

    /// When to wake next, or `None` if the period has already passed.
    pub fn next_wake(&mut self, now: Ticks) -> Option<Ticks> {
        self.cadence.next_wake(now)
    }

    /// Computes the next pattern.
    pub fn advance(&mut self) -> Message {
        self.pattern ^= self.mask;
        Message(self.pattern)
    }

    /// Accounts for a publish attempt. A full queue means the Consumer has
    /// not caught up; that pattern is lost and the next period carries on.
    pub fn record(&mut self, result: Result<(), QueueError>) {
        match result {
            Ok(()) => self.published = self.published.wrapping_add(1),
            Err(QueueError::Full) => {
                self.dropped = self.dropped.wrapping_add(1);
                log::trace!("producer: queue full, pattern dropped");
            }
            Err(e) => log::warn!("producer: send failed: {}", e),
        }
    }

    pub fn published(&self) -> u32 {
        self.published
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// One pass of the Producer loop: wait out the period, then publish the
    /// next pattern without blocking.
    pub fn step<C: TaskContext>(&mut self, ctx: &mut C, queue: QueueHandle) {
        let now = ctx.tick_count();
        if let Some(wake) = self.next_wake(now) {
            ctx.sleep_until(wake);
        }
        let message = self.advance();
        self.record(ctx.try_send(queue, message));
    }
}

/// Producer task. The parameter is the queue handle.
pub extern "C" fn producer_task(param: usize) -> ! {
    let queue = QueueHandle::from_param(param);
    let mut ctx = CurrentTask;
    let mut producer = Producer::blinker(ctx.tick_count());

    loop {
        producer.step(&mut ctx, queue);
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// Applies received patterns to the pins.
#[derive(Debug, Default)]
pub struct Consumer {
    applied: u32,
    anomalies: u32,
}

impl Consumer {
    pub const fn new() -> Self {
        Self {
            applied: 0,
            anomalies: 0,
        }
    }

    pub fn apply<P: HardwarePort>(&mut self, port: &mut P, message: Message) {
        port.write_pins(message.0);
        self.applied = self.applied.wrapping_add(1);
    }

    /// A receive with a finite timeout came back empty: the Producer has
    /// stalled.
    pub fn on_timeout(&mut self) {
        self.anomalies = self.anomalies.wrapping_add(1);
        log::warn!("consumer: no message in time ({} so far)", self.anomalies);
    }

    pub fn applied(&self) -> u32 {
        self.applied
    }

    pub fn anomalies(&self) -> u32 {
        self.anomalies
    }

    /// One pass of the Consumer loop: wait up to `timeout` for a pattern and
    /// drive the pins with it.
    ///
    /// An empty poll (`Timeout::Immediate`) is not an anomaly; a finite wait
    /// that runs out is.
    pub fn step<C: TaskContext, P: HardwarePort>(
        &mut self,
        ctx: &mut C,
        port: &mut P,
        queue: QueueHandle,
        timeout: Timeout,
    ) {
        match ctx.receive::<Message>(queue, timeout) {
            Ok(message) => {
                self.apply(port, message);
                if self.applied % STACK_REPORT_INTERVAL == 0 {
                    if let Some(words) = ctx.stack_high_water_mark() {
                        log::debug!("consumer: {} words of stack never used", words);
                    }
                }
            }
            Err(QueueError::Empty) => {}
            Err(QueueError::TimedOut) => self.on_timeout(),
            Err(e) => log::error!("consumer: receive failed: {}", e),
        }
    }
}

/// Consumer task. The parameter is the queue handle; the board comes from
/// [`LED_PORT`].
pub extern "C" fn consumer_task(param: usize) -> ! {
    let queue = QueueHandle::from_param(param);
    let mut ctx = CurrentTask;
    let Some(mut board) = LED_PORT.take() else {
        log::error!("consumer: LED port was not handed over");
        loop {
            ctx.sleep_until(Ticks::MAX);
        }
    };
    let mut consumer = Consumer::new();

    loop {
        consumer.step(&mut ctx, &mut board, queue, RECEIVE_TIMEOUT);
    }
}

// ---------------------------------------------------------------------------
// Flash patterns
// ---------------------------------------------------------------------------

/// Toggle `mask` `toggles` times, holding each state for `hold_ms`
/// milliseconds. Runs outside the task model (before start or after a
/// failure), so it busy-waits.
pub fn flash<P: HardwarePort>(port: &mut P, mask: u8, toggles: u32, hold_ms: u32) {
    for _ in 0..toggles {
        port.toggle_pins(mask);
        port.delay_cycles(ms_to_cycles(hold_ms));
    }
}

/// The failure indicator.
pub fn flash_fast<P: HardwarePort>(port: &mut P) {
    flash(port, FLASH_MASK, FAST_FLASH_TOGGLES, FAST_FLASH_MS);
}

/// Idle hook body for the firmware build.
pub fn idle_hook() {
    IDLE.run(&CortexM4);
}
