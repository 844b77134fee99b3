// Licensed under the Apache-2.0 license

//! Generic interface for NOR flash access.

use core::result::Result;

/// Simple interface for reading, writing and erasing arbitrary lengths of data on
/// NOR flash. Drivers for the on-board flash implement this trait.
pub trait FlashStorage {
    /// Read from the flash, filling the provided buffer with data
    fn read(&self, buffer: &mut [u8], address: usize) -> Result<(), FlashDrvError>;

    /// Write the full contents of the buffer, starting at the specified address.
    /// The target range must have been erased.
    fn write(&self, buffer: &[u8], address: usize) -> Result<(), FlashDrvError>;

    /// Erase `length` bytes starting at address `address`. Drivers round the
    /// range out to whole sectors.
    fn erase(&self, address: usize, length: usize) -> Result<(), FlashDrvError>;

    /// Returns the size of the flash in bytes.
    fn capacity(&self) -> usize;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum FlashDrvError {
    /// Generic failure condition
    FAIL = 1,
    /// Underlying device is busy; retry
    BUSY = 2,
    /// An invalid parameter was passed
    INVAL = 6,
    /// Range exceeds the device or partition
    SIZE = 7,
    /// No room left for another partition
    NOMEM = 9,
    /// Device is not available
    NODEVICE = 11,
    /// Programmed data did not read back
    VERIFY = 14,
}

impl From<FlashDrvError> for usize {
    fn from(err: FlashDrvError) -> usize {
        err as usize
    }
}

impl core::fmt::Display for FlashDrvError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "flash driver error {}", *self as usize)
    }
}
