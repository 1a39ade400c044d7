//! # Board Support
//!
//! [`HardwarePort`] for an STM32F407 with the eight LED pins on GPIOD0-7.
//! The two LEDs the demo blinks sit on PD0 and PD6 (mask `0x41`).
//!
//! Registers are driven directly; there is no PAC in the dependency graph.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::hal::{HardwarePort, PortError};

// RCC
const RCC_BASE: usize = 0x4002_3800;
const RCC_CR: *mut u32 = (RCC_BASE + 0x00) as *mut u32;
const RCC_CFGR: *mut u32 = (RCC_BASE + 0x08) as *mut u32;
const RCC_AHB1ENR: *mut u32 = (RCC_BASE + 0x30) as *mut u32;
const RCC_APB1ENR: *mut u32 = (RCC_BASE + 0x40) as *mut u32;

const RCC_CR_HSION: u32 = 1 << 0;
const RCC_CR_HSIRDY: u32 = 1 << 1;
const RCC_CFGR_SW_MASK: u32 = 0b11;
const RCC_CFGR_SWS_MASK: u32 = 0b11 << 2;
const RCC_AHB1ENR_GPIODEN: u32 = 1 << 3;
const RCC_APB1ENR_WWDGEN: u32 = 1 << 11;

// GPIOD
const GPIOD_BASE: usize = 0x4002_0C00;
const GPIOD_MODER: *mut u32 = (GPIOD_BASE + 0x00) as *mut u32;
const GPIOD_ODR: *mut u32 = (GPIOD_BASE + 0x14) as *mut u32;
const GPIOD_BSRR: *mut u32 = (GPIOD_BASE + 0x18) as *mut u32;

// Debug MCU: keep watchdogs frozen while the core is halted.
const DBGMCU_APB1_FZ: *mut u32 = 0xE004_2008 as *mut u32;
const DBG_WWDG_STOP: u32 = 1 << 11;
const DBG_IWDG_STOP: u32 = 1 << 12;

/// Polls before giving up on a clock status bit.
const CLOCK_TIMEOUT: u32 = 100_000;

static TAKEN: AtomicBool = AtomicBool::new(false);

/// Word for BSRR that drives the low eight pins to `value` at once: set bits
/// in the low half, reset bits in the high half.
pub const fn bsrr_word(value: u8) -> u32 {
    (value as u32) | ((!value as u32 & 0xFF) << 16)
}

/// MODER with every pin in `mask` switched to general-purpose output.
pub const fn moder_outputs(moder: u32, mask: u8) -> u32 {
    let mut moder = moder;
    let mut pin = 0;
    while pin < 8 {
        if mask & (1 << pin) != 0 {
            moder = (moder & !(0b11 << (pin * 2))) | (0b01 << (pin * 2));
        }
        pin += 1;
    }
    moder
}

/// Polls `reg` until `(value & mask) == expected`.
///
/// # Safety
/// `reg` must be a readable MMIO register.
unsafe fn wait_for(reg: *const u32, mask: u32, expected: u32) -> bool {
    for _ in 0..CLOCK_TIMEOUT {
        if reg.read_volatile() & mask == expected {
            return true;
        }
    }
    false
}

/// Exclusive handle to the LED port and the clock/watchdog setup registers.
///
/// There is only ever one. Bootstrap uses it, then passes it to the
/// Consumer through [`crate::hal::PortSlot`].
pub struct Board {
    _private: (),
}

impl Board {
    /// Claims the board. Returns `None` after the first call.
    pub fn take() -> Option<Self> {
        if TAKEN.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Board { _private: () })
        }
    }
}

impl HardwarePort for Board {
    fn configure_watchdog(&mut self) -> Result<(), PortError> {
        // The window watchdog stays unclocked. The independent watchdog is
        // off after reset; freeze both while a debugger holds the core.
        unsafe {
            let apb1 = RCC_APB1ENR.read_volatile();
            RCC_APB1ENR.write_volatile(apb1 & !RCC_APB1ENR_WWDGEN);

            let fz = DBGMCU_APB1_FZ.read_volatile();
            DBGMCU_APB1_FZ.write_volatile(fz | DBG_WWDG_STOP | DBG_IWDG_STOP);
        }
        Ok(())
    }

    fn configure_clock(&mut self) -> Result<(), PortError> {
        // Run from the internal 16 MHz oscillator.
        unsafe {
            let cr = RCC_CR.read_volatile();
            RCC_CR.write_volatile(cr | RCC_CR_HSION);
            if !wait_for(RCC_CR, RCC_CR_HSIRDY, RCC_CR_HSIRDY) {
                return Err(PortError::OscillatorTimeout);
            }

            let cfgr = RCC_CFGR.read_volatile();
            RCC_CFGR.write_volatile(cfgr & !RCC_CFGR_SW_MASK);
            if !wait_for(RCC_CFGR, RCC_CFGR_SWS_MASK, 0) {
                return Err(PortError::ClockSwitchTimeout);
            }
        }
        Ok(())
    }

    fn set_pin_direction(&mut self, mask: u8) {
        unsafe {
            let ahb1 = RCC_AHB1ENR.read_volatile();
            RCC_AHB1ENR.write_volatile(ahb1 | RCC_AHB1ENR_GPIODEN);
            // Two cycles for the peripheral clock to come up.
            let _ = RCC_AHB1ENR.read_volatile();

            let moder = GPIOD_MODER.read_volatile();
            GPIOD_MODER.write_volatile(moder_outputs(moder, mask));
        }
    }

    #[inline]
    fn write_pins(&mut self, value: u8) {
        unsafe {
            GPIOD_BSRR.write_volatile(bsrr_word(value));
        }
    }

    fn toggle_pins(&mut self, mask: u8) {
        unsafe {
            let odr = GPIOD_ODR.read_volatile();
            GPIOD_ODR.write_volatile(odr ^ mask as u32);
        }
    }
}
