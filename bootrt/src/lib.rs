// Licensed under the Apache-2.0 license

#![cfg_attr(target_arch = "arm", no_std)]
#![allow(static_mut_refs)]

mod logger;
pub use logger::*;

// Helpers to handle writing to the debug UART output.

use core::fmt::{Display, Write};

pub static mut WRITER: Option<&'static mut dyn Write> = None;

/// Sets the global backing writer for `print` and `println` macros.
pub fn set_printer(writer: &'static mut dyn Write) {
    unsafe {
        WRITER = Some(writer);
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        unsafe {
            if let Some(writer) = $crate::WRITER.as_mut() {
                let _ = write!(writer, $($arg)*);
            }
        }
    };
}

#[macro_export]
macro_rules! println {
    ($($arg:tt)*) => {
        if let Some(writer) = unsafe { $crate::WRITER.as_mut() } {
            let _ = writeln!(writer, $($arg)*);
        }
    };
}

pub struct HexBytes<'a>(pub &'a [u8]);
impl Display for HexBytes<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for &x in self.0.iter() {
            for nibble in [x >> 4, x & 0xf] {
                let c = if nibble < 10 {
                    nibble + b'0'
                } else {
                    nibble - 10 + b'A'
                };
                f.write_char(c as char)?;
            }
        }
        Ok(())
    }
}

pub struct HexWord(pub u32);
impl Display for HexWord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        HexBytes(&self.0.to_be_bytes()).fmt(f)
    }
}
