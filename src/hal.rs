//! # Hardware Port
//!
//! The boundary between the application and the microcontroller. Bootstrap,
//! the Consumer and the flash patterns only ever touch hardware through
//! these traits; [`crate::board`] implements them for the real chip and the
//! host tests implement them with recorders.

use core::fmt;

use crate::sync::Shared;

/// Hardware bring-up failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    /// The selected oscillator never reported ready.
    OscillatorTimeout,
    /// The clock mux never reported the requested source.
    ClockSwitchTimeout,
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::OscillatorTimeout => f.write_str("oscillator did not start"),
            PortError::ClockSwitchTimeout => f.write_str("system clock switch timed out"),
        }
    }
}

/// Digital output pins plus the bring-up steps they need.
///
/// Pin operations take 8-bit masks: bit `n` is output pin `n` of the LED
/// port.
pub trait HardwarePort {
    /// Put the watchdog in a state where it will not reset the demo.
    fn configure_watchdog(&mut self) -> Result<(), PortError>;

    /// Select the system clock source.
    fn configure_clock(&mut self) -> Result<(), PortError>;

    /// Make the pins in `mask` outputs. Other pins are left alone.
    fn set_pin_direction(&mut self, mask: u8);

    /// Drive all eight pins to `value` in a single register write.
    fn write_pins(&mut self, value: u8);

    /// Invert the pins in `mask`.
    fn toggle_pins(&mut self, mask: u8);

    /// Busy-wait for at least `cycles` core clock cycles.
    fn delay_cycles(&mut self, cycles: u32) {
        cortex_m::asm::delay(cycles);
    }
}

/// Low-power wait used by the idle policy.
pub trait PowerControl {
    /// Sleep until the next interrupt.
    fn wait_for_interrupt(&self);
}

/// Single-owner hand-off for a port.
///
/// Bootstrap puts the port here before the scheduler starts; the task that
/// drives the pins takes it exactly once. If the start fails the caller
/// takes it back for the failure flash.
pub struct PortSlot<P> {
    port: Shared<Option<P>>,
}

impl<P> PortSlot<P> {
    pub const fn new() -> Self {
        Self {
            port: Shared::new(None),
        }
    }

    /// Stores `port`, replacing anything already there.
    pub fn put(&self, port: P) {
        self.port.with(|slot| *slot = Some(port));
    }

    /// Removes the port. `None` if it was never put or already taken.
    pub fn take(&self) -> Option<P> {
        self.port.with(Option::take)
    }
}

impl<P> Default for PortSlot<P> {
    fn default() -> Self {
        Self::new()
    }
}
