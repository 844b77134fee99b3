/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Boot image selection, verification and recovery for the OBC bootloader.

--*/

#![cfg_attr(target_arch = "arm", no_std)]

use bootrt::HexWord;
use core::fmt::Write;

pub mod boot_status;
pub use boot_status::*;
pub mod copy;
pub use copy::*;
pub mod flash;
pub mod fram;
pub mod fs;
pub mod handoff;
pub use handoff::*;
pub mod integrity;
pub mod record;
pub mod selector;
pub use selector::{BootOutcome, BootResources, BootSelector};
pub mod source;
pub mod watchdog;
pub use watchdog::Watchdog;

/// Fatal error codes passed to the registered [`FatalErrorHandler`].
pub const FATAL_ALL_CANDIDATES_EXHAUSTED: u32 = 0x0001;
pub const FATAL_SELECTOR_TRANSITION: u32 = 0x0002;
pub const FATAL_PANIC: u32 = 0x00ff;

pub trait FatalErrorHandler {
    fn fatal_error(&mut self, code: u32) -> !;
}

/// Routes `log` output of the bootloader to the debug UART.
pub fn init_console(uart: &'static mut dyn Write, level: log::LevelFilter) {
    bootrt::set_printer(uart);
    bootrt::init_logger(level);
}

static mut FATAL_ERROR_HANDLER: Option<&'static mut dyn FatalErrorHandler> = None;

/// Set the fatal error handler.
///
/// SAFETY: it is important that the passed fatal handler is never used otherwise
/// and no other references exist to it. It is recommended to create a single instance
/// of the struct and pass it in immediately, and never use it otherwise.
pub fn set_fatal_error_handler(handler: &'static mut dyn FatalErrorHandler) {
    unsafe {
        FATAL_ERROR_HANDLER = Some(handler);
    }
}

#[panic_handler]
#[inline(never)]
#[cfg(target_arch = "arm")]
fn bootloader_panic(_: &core::panic::PanicInfo) -> ! {
    fatal_error(FATAL_PANIC);
}

/// Stops the boot. Without a handler the core spins until the hardware
/// watchdog resets it.
#[inline(never)]
#[allow(clippy::empty_loop)]
pub fn fatal_error(code: u32) -> ! {
    bootrt::println!("[obc-boot] Fatal error 0x{}", HexWord(code));
    #[allow(static_mut_refs)]
    if let Some(handler) = unsafe { FATAL_ERROR_HANDLER.as_mut() } {
        handler.fatal_error(code);
    } else {
        loop {}
    }
}
