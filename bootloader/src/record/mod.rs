// Licensed under the Apache-2.0 license

//! Persistent boot record backed by FRAM.

mod shared;
mod store;

pub use shared::SharedBootRecordStore;
pub use store::FramBootRecordStore;

use boot_image::{hamming_region, CounterStep, SlotId};
use obc_config::RecordError;

/// FRAM address of `len` Hamming code bytes at `offset` within the region of `slot`.
pub(crate) fn hamming_code_address(
    slot: SlotId,
    offset: u32,
    len: usize,
    fram_size: u32,
) -> Result<u32, RecordError> {
    let region = hamming_region(slot, fram_size).map_err(|_| RecordError::OutOfRange)?;
    match offset.checked_add(len as u32) {
        Some(end) if end <= region.capacity => Ok(region.address + offset),
        _ => Err(RecordError::OutOfRange),
    }
}

pub(crate) fn counter_result(step: CounterStep) -> Result<u16, RecordError> {
    match step {
        CounterStep::Advanced(value) => Ok(value),
        CounterStep::Wrapped(value) => Err(RecordError::SentinelOverflow(value)),
    }
}
