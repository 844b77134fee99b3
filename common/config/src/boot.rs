// Licensed under the Apache-2.0 license

use boot_image::{BootRecord, SlotId, SlotImageInfo};

/// Trait for accessing and modifying the persistent boot record.
///
/// This trait abstracts the operations required to track reboot counters,
/// Hamming code settings and image sizes of every boot slot.
#[allow(async_fn_in_trait)]
pub trait BootRecordStoreAsync {
    /// Reads the complete record.
    ///
    /// # Returns
    /// * `BootRecord` - The decoded record. Storage without a valid record reads
    ///   back as [`BootRecord::blank`].
    async fn read_record(&self) -> Result<BootRecord, RecordError>;

    /// Increments the reboot counter of a slot.
    ///
    /// # Arguments
    /// * `slot` - The slot whose counter is to be incremented.
    ///
    /// # Returns
    /// * `Result<u16, RecordError>` - The new counter value. A counter at its limit
    ///   restarts and reports `RecordError::SentinelOverflow` carrying the value
    ///   that was written. On any other error the counter must be assumed unchanged.
    async fn increment_reboot_counter(&self, slot: SlotId) -> Result<u16, RecordError>;

    /// Resets the reboot counter of a slot after a confirmed boot.
    async fn reset_reboot_counter(&self, slot: SlotId) -> Result<(), RecordError>;

    /// Retrieves the reboot counter of a slot.
    async fn get_reboot_counter(&self, slot: SlotId) -> Result<u16, RecordError>;

    /// Checks if the image in a slot is protected by a Hamming code.
    async fn get_hamming_flag(&self, slot: SlotId) -> Result<bool, RecordError>;

    /// Enables or disables Hamming decoding for a slot.
    async fn set_hamming_flag(&self, slot: SlotId, enabled: bool) -> Result<(), RecordError>;

    /// Sets the master switch for Hamming decoding. A slot's code is only
    /// used while both this flag and the slot's own flag are set.
    async fn set_global_hamming_flag(&self, enabled: bool) -> Result<(), RecordError>;

    /// Records size, Hamming code and CRC information after a slot was written.
    async fn write_slot_image_info(
        &self,
        slot: SlotId,
        info: &SlotImageInfo,
    ) -> Result<(), RecordError>;

    /// Writes part of the Hamming code of a slot.
    ///
    /// # Arguments
    /// * `slot` - The slot the code belongs to.
    /// * `offset` - Offset within the slot's Hamming code region.
    /// * `data` - Code bytes.
    async fn write_hamming_code(
        &self,
        slot: SlotId,
        offset: u32,
        data: &[u8],
    ) -> Result<(), RecordError>;

    /// Marks a slot as holding a software update to be tried first, or clears
    /// the mark.
    async fn set_pending_update(&self, slot: Option<SlotId>) -> Result<(), RecordError>;
}

// Synchronous version of the BootRecordStoreAsync trait
pub trait BootRecordStore {
    /// Reads the complete record.
    fn read_record(&mut self) -> Result<BootRecord, RecordError>;

    /// Increments the reboot counter of a slot.
    fn increment_reboot_counter(&mut self, slot: SlotId) -> Result<u16, RecordError>;

    /// Resets the reboot counter of a slot.
    fn reset_reboot_counter(&mut self, slot: SlotId) -> Result<(), RecordError>;

    /// Checks if the image in a slot is protected by a Hamming code.
    fn get_hamming_flag(&mut self, slot: SlotId) -> Result<bool, RecordError>;

    /// Enables or disables Hamming decoding for a slot.
    fn set_hamming_flag(&mut self, slot: SlotId, enabled: bool) -> Result<(), RecordError>;

    /// Retrieves the recorded binary size of a slot.
    fn get_recorded_size(&mut self, slot: SlotId) -> Result<u32, RecordError>;

    /// Records size, Hamming code and CRC information after a slot was written.
    fn write_slot_image_info(
        &mut self,
        slot: SlotId,
        info: &SlotImageInfo,
    ) -> Result<(), RecordError>;

    /// Reads part of the Hamming code of a slot into `buf`.
    fn read_hamming_code(
        &mut self,
        slot: SlotId,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), RecordError>;

    /// Writes part of the Hamming code of a slot.
    fn write_hamming_code(
        &mut self,
        slot: SlotId,
        offset: u32,
        data: &[u8],
    ) -> Result<(), RecordError>;

    /// Sets the master switch for Hamming decoding.
    fn set_global_hamming_flag(&mut self, enabled: bool) -> Result<(), RecordError>;

    /// Value past which reboot counters wrap back to 1.
    fn set_counter_limit(&mut self, limit: u16);
}

// Define RecordError for error handling in the record store traits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    /// The transfer did not complete in time.
    TransferTimeout,
    /// The driver reported a failed transfer.
    TransferError(u8),
    /// The counter wrapped; the contained value was written.
    SentinelOverflow(u16),
    /// Access outside of the record or of a Hamming code region.
    OutOfRange,
}

impl RecordError {
    /// Transfer failures are transient and may be retried.
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            RecordError::TransferTimeout | RecordError::TransferError(_)
        )
    }
}

impl core::fmt::Display for RecordError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RecordError::TransferTimeout => write!(f, "FRAM transfer timeout"),
            RecordError::TransferError(code) => write!(f, "FRAM transfer error {}", code),
            RecordError::SentinelOverflow(value) => {
                write!(f, "reboot counter wrapped to {}", value)
            }
            RecordError::OutOfRange => write!(f, "FRAM access out of range"),
        }
    }
}
