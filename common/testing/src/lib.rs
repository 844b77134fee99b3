// Licensed under the Apache-2.0 license

//! In-memory stand-ins for the OBC peripherals, shared by the bootloader and
//! flight software tests.

mod flash;
mod fram;
mod fs;
pub mod image;
mod platform;

pub use flash::MemFlash;
pub use fram::MemFram;
pub use fs::{MemFile, MemFileSystem};
pub use platform::{
    CountingWatchdog, NeverExpires, RamExecMemory, RecordingHandoff, RecordingReporter,
};

/// Base address of the execution memory used by the tests.
pub const TEST_EXEC_BASE: u32 = 0x2000_0000;
