// Licensed under the Apache-2.0 license

//! `log` backend writing through the registered printer.

use core::fmt::Write;
use log::{LevelFilter, Log, Metadata, Record};

pub struct BootLogger {
    prefix: &'static str,
}

impl BootLogger {
    pub const fn new(prefix: &'static str) -> Self {
        BootLogger { prefix }
    }
}

impl Log for BootLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::println!("[{}] {:<5} {}", self.prefix, record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: BootLogger = BootLogger::new("obc-boot");

/// Routes `log` records to the printer set with [`crate::set_printer`].
///
/// Must be called once, before any other code logs.
pub fn init_logger(level: LevelFilter) {
    // ARMv5 has no atomic compare-and-swap, the bootloader is single threaded.
    #[cfg(target_arch = "arm")]
    unsafe {
        let _ = log::set_logger_racy(&LOGGER);
        log::set_max_level_racy(level);
    }

    #[cfg(not(target_arch = "arm"))]
    {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(level);
    }
}
