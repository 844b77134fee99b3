// Licensed under the Apache-2.0 license

use super::{counter_result, hamming_code_address};
use crate::fram::FramBus;
use boot_image::{
    bool_byte, BootRecord, BootRecordLayout, SdCard, SlotId, SlotImageInfo, COUNTER_FIELD_LEN,
    DEFAULT_COUNTER_LIMIT, FRAM_UNINITIALIZED,
};
use log::{debug, warn};
use obc_config::{BootRecordStore, RecordError};
use zerocopy::{FromZeros, IntoBytes};

/// Boot record store using blocking FRAM transfers, used by the bootloader.
///
/// Every update is a read-modify-write of the affected field only. Storage
/// that does not hold a valid record reads back as the blank record and is
/// formatted by the first update.
pub struct FramBootRecordStore<B: FramBus> {
    bus: B,
    record_address: u32,
    counter_limit: u16,
}

impl<B: FramBus> FramBootRecordStore<B> {
    pub fn new(bus: B, record_address: u32) -> Self {
        FramBootRecordStore {
            bus,
            record_address,
            counter_limit: DEFAULT_COUNTER_LIMIT,
        }
    }

    pub fn with_counter_limit(mut self, counter_limit: u16) -> Self {
        self.set_counter_limit(counter_limit);
        self
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Writes a blank record, dropping all counters and slot information.
    pub fn format(&mut self) -> Result<(), RecordError> {
        self.write_at(0, BootRecordLayout::blank().as_bytes())
    }

    pub fn set_preferred_sd_card(&mut self, card: SdCard) -> Result<(), RecordError> {
        let mut layout = self.read_formatted()?;
        layout.preferred_sd_card = card.into();
        self.write_at(0, layout.as_bytes())
    }

    pub fn set_pending_update(&mut self, slot: Option<SlotId>) -> Result<(), RecordError> {
        self.read_formatted()?;
        let bytes = [
            bool_byte(slot.is_some()),
            slot.map_or(FRAM_UNINITIALIZED, u8::from),
        ];
        self.write_at(BootRecordLayout::update_offset(), &bytes)
    }

    fn read_layout(&mut self) -> Result<BootRecordLayout, RecordError> {
        let mut layout = BootRecordLayout::new_zeroed();
        self.bus.read(self.record_address, layout.as_mut_bytes())?;
        Ok(layout)
    }

    fn read_formatted(&mut self) -> Result<BootRecordLayout, RecordError> {
        let layout = self.read_layout()?;
        if layout.is_formatted() {
            return Ok(layout);
        }
        warn!("Boot record not formatted, writing blank record");
        let blank = BootRecordLayout::blank();
        self.write_at(0, blank.as_bytes())?;
        Ok(blank)
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<(), RecordError> {
        self.bus.write(self.record_address + offset as u32, data)?;
        Ok(())
    }
}

impl<B: FramBus> BootRecordStore for FramBootRecordStore<B> {
    fn read_record(&mut self) -> Result<BootRecord, RecordError> {
        let layout = self.read_layout()?;
        Ok(BootRecord::from(&layout))
    }

    fn increment_reboot_counter(&mut self, slot: SlotId) -> Result<u16, RecordError> {
        let mut layout = self.read_formatted()?;
        let step = layout.slot_mut(slot).advance_counter(self.counter_limit);
        self.write_at(
            BootRecordLayout::counter_offset(slot),
            layout.slot(slot).counter_bytes(),
        )?;
        debug!("Reboot counter of {} is now {}", slot, step.value());
        counter_result(step)
    }

    fn reset_reboot_counter(&mut self, slot: SlotId) -> Result<(), RecordError> {
        let mut layout = self.read_formatted()?;
        layout.slot_mut(slot).reset_counter();
        self.write_at(
            BootRecordLayout::counter_offset(slot),
            layout.slot(slot).counter_bytes(),
        )
    }

    fn get_hamming_flag(&mut self, slot: SlotId) -> Result<bool, RecordError> {
        Ok(self.read_record()?.slot(slot).hamming_enabled)
    }

    fn set_hamming_flag(&mut self, slot: SlotId, enabled: bool) -> Result<(), RecordError> {
        self.read_formatted()?;
        self.write_at(
            BootRecordLayout::hamming_flag_offset(slot),
            &[bool_byte(enabled)],
        )
    }

    fn set_global_hamming_flag(&mut self, enabled: bool) -> Result<(), RecordError> {
        self.read_formatted()?;
        self.write_at(
            BootRecordLayout::global_hamming_offset(),
            &[bool_byte(enabled)],
        )
    }

    fn set_counter_limit(&mut self, limit: u16) {
        self.counter_limit = limit;
    }

    fn get_recorded_size(&mut self, slot: SlotId) -> Result<u32, RecordError> {
        Ok(self.read_record()?.slot(slot).binary_size)
    }

    fn write_slot_image_info(
        &mut self,
        slot: SlotId,
        info: &SlotImageInfo,
    ) -> Result<(), RecordError> {
        let mut layout = self.read_formatted()?;
        info.apply(layout.slot_mut(slot));
        // The counter bytes are left untouched.
        self.write_at(
            BootRecordLayout::hamming_flag_offset(slot),
            &layout.slot(slot).as_bytes()[COUNTER_FIELD_LEN..],
        )
    }

    fn read_hamming_code(
        &mut self,
        slot: SlotId,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), RecordError> {
        let address = hamming_code_address(slot, offset, buf.len(), self.bus.size())?;
        self.bus.read(address, buf)?;
        Ok(())
    }

    fn write_hamming_code(
        &mut self,
        slot: SlotId,
        offset: u32,
        data: &[u8],
    ) -> Result<(), RecordError> {
        let address = hamming_code_address(slot, offset, data.len(), self.bus.size())?;
        self.bus.write(address, data)?;
        Ok(())
    }
}
