// Licensed under the Apache-2.0 license

use crate::flash::hil::{FlashDrvError, FlashStorage};

/// Represents a partition within the NOR flash.
///
/// A `FlashPartition` provides a view into a contiguous region of the underlying
/// flash, allowing for read, write, and erase operations within the
/// specified bounds. All operations are checked to ensure they do not exceed
/// the partition's boundaries.
///
/// # Fields
/// - `driver`: Reference to the flash driver.
/// - `name`: Name of the partition (for logging).
/// - `base_offset`: The starting offset of the partition within the flash.
/// - `length`: The size of the partition in bytes.
pub struct FlashPartition<'a> {
    driver: &'a dyn FlashStorage,
    name: &'static str,
    base_offset: usize,
    length: usize,
}

impl<'a> FlashPartition<'a> {
    /// Creates a new `FlashPartition` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(FlashPartition)` if the partition fits within the flash capacity,
    /// otherwise returns `Err(FlashDrvError::SIZE)`.
    pub fn new(
        driver: &'a dyn FlashStorage,
        name: &'static str,
        base_offset: usize,
        length: usize,
    ) -> Result<Self, FlashDrvError> {
        if base_offset + length > driver.capacity() {
            return Err(FlashDrvError::SIZE);
        }
        Ok(FlashPartition {
            driver,
            name,
            base_offset,
            length,
        })
    }

    fn check(&self, partition_offset: usize, len: usize) -> Result<(), FlashDrvError> {
        match partition_offset.checked_add(len) {
            Some(end) if end <= self.length => Ok(()),
            _ => Err(FlashDrvError::SIZE),
        }
    }

    /// Reads data from the partition into `buf`, starting at `partition_offset`.
    ///
    /// Returns `Err(FlashDrvError::SIZE)` if the requested range exceeds the
    /// partition, or propagates errors from the driver.
    pub fn read(&self, partition_offset: usize, buf: &mut [u8]) -> Result<(), FlashDrvError> {
        self.check(partition_offset, buf.len())?;
        self.driver.read(buf, self.base_offset + partition_offset)
    }

    /// Writes `buf` into the partition, starting at `partition_offset`.
    pub fn write(&self, partition_offset: usize, buf: &[u8]) -> Result<(), FlashDrvError> {
        self.check(partition_offset, buf.len())?;
        self.driver.write(buf, self.base_offset + partition_offset)
    }

    /// Erases `len` bytes of the partition, starting at `partition_offset`.
    pub fn erase(&self, partition_offset: usize, len: usize) -> Result<(), FlashDrvError> {
        self.check(partition_offset, len)?;
        self.driver.erase(self.base_offset + partition_offset, len)
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn base_offset(&self) -> usize {
        self.base_offset
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
