//! # Logging
//!
//! The crate logs through the `log` facade. Without a transport every
//! `log::*!` call compiles to a level check against the default `Off` filter.
//!
//! With the `semihosting` feature, [`init`] installs a logger that prints
//! through the debugger. Semihosting halts the core for each call, so it is
//! only for bench debugging; never log from interrupt handlers or the idle
//! hook.

/// Install the log transport selected at build time. Call once, first thing
/// in `main`.
pub fn init() {
    #[cfg(feature = "semihosting")]
    semihosting::init();
}

#[cfg(feature = "semihosting")]
mod semihosting {
    use cortex_m_semihosting::hprintln;
    use log::{LevelFilter, Log, Metadata, Record};

    struct SemihostingLogger;

    static LOGGER: SemihostingLogger = SemihostingLogger;

    impl Log for SemihostingLogger {
        fn enabled(&self, metadata: &Metadata<'_>) -> bool {
            metadata.level() <= log::max_level()
        }

        fn log(&self, record: &Record<'_>) {
            if self.enabled(record.metadata()) {
                hprintln!("[{:<5}] {}", record.level(), record.args());
            }
        }

        fn flush(&self) {}
    }

    pub(super) fn init() {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Debug);
        }
    }
}
