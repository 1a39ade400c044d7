//! # Synchronization Primitives
//!
//! Interrupt-safe shared state for the kernel. Everything the scheduler owns
//! is reached through a [`Shared`] cell, which only hands out `&mut` access
//! inside a critical section.
//!
//! The critical section implementation is chosen at link time through the
//! `critical-section` crate: `cortex-m`'s single-core implementation on the
//! target (PRIMASK save/disable/restore), the crate's `std` implementation in
//! host tests.

use core::cell::RefCell;

use critical_section::Mutex;

pub use critical_section::CriticalSection;

/// Execute a closure within a critical section (interrupts disabled).
///
/// Nesting is allowed; interrupts are restored to their prior state when the
/// outermost section ends.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// A value shared between task context and interrupt handlers.
///
/// `Shared<T>` is `Sync` whenever `T: Send`, so it can live in a plain
/// `static` without `static mut`.
pub struct Shared<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> Shared<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Runs `f` with exclusive access to the value.
    ///
    /// # Panics
    /// If called again from inside `f`. Kernel entry points never nest, and
    /// interrupt handlers cannot preempt a critical section.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }
}
