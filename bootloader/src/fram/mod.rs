// Licensed under the Apache-2.0 license

//! FRAM access. Three transfer disciplines are supported: plain blocking
//! drivers implement [`FramBus`] directly, interrupt driven drivers implement
//! [`FramDriver`] and are wrapped in [`PolledFram`] (no scheduler) or
//! [`NotifiedFram`] (async tasks).

mod transfer;
pub use transfer::*;

use obc_config::RecordError;

/// Driver code reported for a transfer rejected because another is in flight.
pub const FRAM_BUSY_CODE: u8 = 0xfe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramError {
    Timeout,
    /// The driver reported a failed transfer with the given code.
    Transfer(u8),
    OutOfRange,
    /// Another transfer is still in flight.
    Busy,
}

impl From<FramError> for RecordError {
    fn from(err: FramError) -> Self {
        match err {
            FramError::Timeout => RecordError::TransferTimeout,
            FramError::Transfer(code) => RecordError::TransferError(code),
            FramError::OutOfRange => RecordError::OutOfRange,
            FramError::Busy => RecordError::TransferError(FRAM_BUSY_CODE),
        }
    }
}

/// Blocking FRAM access.
pub trait FramBus {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FramError>;

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FramError>;

    /// Size of the device in bytes.
    fn size(&self) -> u32;
}

/// FRAM access completing asynchronously.
#[allow(async_fn_in_trait)]
pub trait FramBusAsync {
    async fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FramError>;

    async fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FramError>;

    /// Cancels a transfer whose future was dropped before completion.
    fn abort(&mut self) {}

    fn size(&self) -> u32;
}

pub(crate) fn check_range(size: u32, address: u32, len: usize) -> Result<(), FramError> {
    match address.checked_add(len as u32) {
        Some(end) if end <= size => Ok(()),
        _ => Err(FramError::OutOfRange),
    }
}
