// Licensed under the Apache-2.0 license

//! Persistent boot record as stored in FRAM.
//!
//! The record is a packed, little-endian structure made of a small header and
//! one fixed-size entry per [`SlotId`]. Boolean bytes only count as set when
//! they hold [`FRAM_TRUE`], so erased (`0xff`) or zeroed storage reads back as
//! "not set".

use core::mem::{offset_of, size_of};

use crate::{ImageError, SdCard, SlotId, SLOT_COUNT};
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const BOOT_RECORD_MAGIC: u32 = u32::from_be_bytes(*b"OBCB");
pub const BOOT_RECORD_VERSION: u16 = 0x0001;

pub const FRAM_TRUE: u8 = 1;
pub const FRAM_FALSE: u8 = 0;
pub const FRAM_UNINITIALIZED: u8 = 0xff;

/// Default limit after which a reboot counter wraps.
pub const DEFAULT_COUNTER_LIMIT: u16 = u8::MAX as u16;

pub const BOOTLOADER_HAMMING_RESERVED_SIZE: u32 = 0x600;
pub const IMAGES_HAMMING_RESERVED_SIZE: u32 = 0x2A00;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SlotRecordLayout {
    pub reboot_counter: U16<LittleEndian>,
    pub counter_state: u8,
    pub hamming_flag: u8,
    pub binary_size: U32<LittleEndian>,
    pub hamming_code_size: U32<LittleEndian>,
    pub image_crc: U16<LittleEndian>,
    pub image_crc_state: u8,
    pub reserved: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BootRecordLayout {
    pub magic: U32<LittleEndian>,
    pub version: U16<LittleEndian>,
    pub preferred_sd_card: u8,
    pub global_hamming_flag: u8,
    pub update_pending: u8,
    pub update_slot: u8,
    pub reserved: [u8; 2],
    pub slots: [SlotRecordLayout; SLOT_COUNT],
}

pub const SLOT_RECORD_SIZE: usize = size_of::<SlotRecordLayout>();
pub const BOOT_RECORD_SIZE: usize = size_of::<BootRecordLayout>();

/// Byte span of the reboot counter and its state byte, written together.
pub const COUNTER_FIELD_LEN: usize = offset_of!(SlotRecordLayout, counter_state) + 1;

/// Outcome of advancing a reboot counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterStep {
    Advanced(u16),
    /// The counter was at its limit and restarted.
    Wrapped(u16),
}

impl CounterStep {
    pub fn value(self) -> u16 {
        match self {
            CounterStep::Advanced(v) | CounterStep::Wrapped(v) => v,
        }
    }
}

impl SlotRecordLayout {
    pub fn counter_initialized(&self) -> bool {
        self.counter_state == FRAM_TRUE
    }

    /// Counter value, an uninitialized counter reads as zero.
    pub fn counter(&self) -> u16 {
        if self.counter_initialized() {
            self.reboot_counter.get()
        } else {
            0
        }
    }

    /// Advances the counter by one attempt. A counter at `limit` restarts at one
    /// so the attempt being recorded is still counted.
    pub fn advance_counter(&mut self, limit: u16) -> CounterStep {
        let step = if !self.counter_initialized() {
            CounterStep::Advanced(1)
        } else {
            let current = self.reboot_counter.get();
            if current >= limit {
                CounterStep::Wrapped(1)
            } else {
                CounterStep::Advanced(current + 1)
            }
        };
        self.reboot_counter.set(step.value());
        self.counter_state = FRAM_TRUE;
        step
    }

    pub fn reset_counter(&mut self) {
        self.reboot_counter.set(0);
        self.counter_state = FRAM_TRUE;
    }

    /// The counter and its state byte as they are written to FRAM.
    pub fn counter_bytes(&self) -> &[u8] {
        &self.as_bytes()[..COUNTER_FIELD_LEN]
    }
}

impl BootRecordLayout {
    /// A formatted record with every counter unset and every slot empty.
    pub fn blank() -> Self {
        let mut layout = Self::new_zeroed();
        layout.magic.set(BOOT_RECORD_MAGIC);
        layout.version.set(BOOT_RECORD_VERSION);
        layout
    }

    pub fn is_formatted(&self) -> bool {
        self.magic.get() == BOOT_RECORD_MAGIC && self.version.get() == BOOT_RECORD_VERSION
    }

    pub fn slot(&self, slot: SlotId) -> &SlotRecordLayout {
        &self.slots[slot.index()]
    }

    pub fn slot_mut(&mut self, slot: SlotId) -> &mut SlotRecordLayout {
        &mut self.slots[slot.index()]
    }

    pub fn slot_offset(slot: SlotId) -> usize {
        offset_of!(BootRecordLayout, slots) + slot.index() * SLOT_RECORD_SIZE
    }

    pub fn counter_offset(slot: SlotId) -> usize {
        Self::slot_offset(slot) + offset_of!(SlotRecordLayout, reboot_counter)
    }

    pub fn hamming_flag_offset(slot: SlotId) -> usize {
        Self::slot_offset(slot) + offset_of!(SlotRecordLayout, hamming_flag)
    }

    pub fn global_hamming_offset() -> usize {
        offset_of!(BootRecordLayout, global_hamming_flag)
    }

    pub fn update_offset() -> usize {
        offset_of!(BootRecordLayout, update_pending)
    }
}

/// Decoded view of one slot entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotInfo {
    pub reboot_counter: u16,
    pub counter_initialized: bool,
    pub hamming_enabled: bool,
    pub binary_size: u32,
    pub hamming_code_size: u32,
    pub image_crc: Option<u16>,
}

impl From<&SlotRecordLayout> for SlotInfo {
    fn from(layout: &SlotRecordLayout) -> Self {
        SlotInfo {
            reboot_counter: layout.counter(),
            counter_initialized: layout.counter_initialized(),
            hamming_enabled: layout.hamming_flag == FRAM_TRUE,
            binary_size: layout.binary_size.get(),
            hamming_code_size: layout.hamming_code_size.get(),
            image_crc: (layout.image_crc_state == FRAM_TRUE).then(|| layout.image_crc.get()),
        }
    }
}

/// Image metadata written after a slot has been (re)programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotImageInfo {
    pub binary_size: u32,
    pub hamming_code_size: u32,
    pub hamming_enabled: bool,
    pub image_crc: Option<u16>,
}

impl SlotImageInfo {
    pub fn apply(&self, layout: &mut SlotRecordLayout) {
        layout.binary_size.set(self.binary_size);
        layout.hamming_code_size.set(self.hamming_code_size);
        layout.hamming_flag = bool_byte(self.hamming_enabled);
        match self.image_crc {
            Some(crc) => {
                layout.image_crc.set(crc);
                layout.image_crc_state = FRAM_TRUE;
            }
            None => {
                layout.image_crc.set(0);
                layout.image_crc_state = FRAM_FALSE;
            }
        }
    }
}

pub fn bool_byte(value: bool) -> u8 {
    if value {
        FRAM_TRUE
    } else {
        FRAM_FALSE
    }
}

/// Snapshot of the persisted boot record taken once per boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRecord {
    /// False when the storage did not hold a valid record.
    pub formatted: bool,
    pub preferred_sd_card: SdCard,
    pub global_hamming: bool,
    pub pending_update: Option<SlotId>,
    slots: [SlotInfo; SLOT_COUNT],
}

impl BootRecord {
    pub fn blank() -> Self {
        BootRecord {
            formatted: false,
            preferred_sd_card: SdCard::Sd0,
            global_hamming: false,
            pending_update: None,
            slots: [SlotInfo::default(); SLOT_COUNT],
        }
    }

    pub fn slot(&self, slot: SlotId) -> &SlotInfo {
        &self.slots[slot.index()]
    }

    pub fn slot_mut(&mut self, slot: SlotId) -> &mut SlotInfo {
        &mut self.slots[slot.index()]
    }
}

impl From<&BootRecordLayout> for BootRecord {
    fn from(layout: &BootRecordLayout) -> Self {
        if !layout.is_formatted() {
            return BootRecord::blank();
        }
        let mut record = BootRecord {
            formatted: true,
            preferred_sd_card: SdCard::try_from(layout.preferred_sd_card).unwrap_or(SdCard::Sd0),
            global_hamming: layout.global_hamming_flag == FRAM_TRUE,
            pending_update: None,
            slots: [SlotInfo::default(); SLOT_COUNT],
        };
        if layout.update_pending == FRAM_TRUE {
            record.pending_update = SlotId::try_from(layout.update_slot).ok();
        }
        for slot in SlotId::ALL {
            record.slots[slot.index()] = SlotInfo::from(layout.slot(slot));
        }
        record
    }
}

/// FRAM area reserved for the Hamming code of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HammingRegion {
    pub address: u32,
    pub capacity: u32,
}

fn hamming_reserved_size(slot: SlotId) -> u32 {
    if slot.is_bootloader() {
        BOOTLOADER_HAMMING_RESERVED_SIZE
    } else {
        IMAGES_HAMMING_RESERVED_SIZE
    }
}

/// Hamming code regions are stacked downwards from the end of FRAM in slot order.
pub fn hamming_region(slot: SlotId, fram_size: u32) -> Result<HammingRegion, ImageError> {
    let mut end = fram_size;
    for candidate in SlotId::ALL {
        let capacity = hamming_reserved_size(candidate);
        let address = end.checked_sub(capacity).ok_or(ImageError::FramTooSmall)?;
        if candidate == slot {
            return Ok(HammingRegion { address, capacity });
        }
        end = address;
    }
    Err(ImageError::FramTooSmall)
}

/// Lowest FRAM address used by the Hamming code regions.
pub fn hamming_regions_start(fram_size: u32) -> Result<u32, ImageError> {
    SlotId::ALL.iter().try_fold(fram_size, |end, slot| {
        end.checked_sub(hamming_reserved_size(*slot))
            .ok_or(ImageError::FramTooSmall)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(SLOT_RECORD_SIZE, 16);
        assert_eq!(BOOT_RECORD_SIZE, 12 + 16 * SLOT_COUNT);
        assert_eq!(COUNTER_FIELD_LEN, 3);
        assert_eq!(BootRecordLayout::slot_offset(SlotId::BootloaderPrimary), 12);
        assert_eq!(BootRecordLayout::counter_offset(SlotId::NorFlash), 12 + 32);
        assert_eq!(BootRecordLayout::hamming_flag_offset(SlotId::NorFlash), 12 + 32 + 3);
    }

    #[test]
    fn test_erased_storage_reads_blank() {
        let erased = [FRAM_UNINITIALIZED; BOOT_RECORD_SIZE];
        let layout = BootRecordLayout::read_from_bytes(&erased).unwrap();
        let record = BootRecord::from(&layout);
        assert!(!record.formatted);
        assert_eq!(record, BootRecord::blank());
    }

    #[test]
    fn test_uninitialized_counter_reads_zero() {
        let mut layout = BootRecordLayout::blank();
        layout.slot_mut(SlotId::NorFlash).reboot_counter.set(0xffff);
        layout.slot_mut(SlotId::NorFlash).counter_state = FRAM_UNINITIALIZED;
        let record = BootRecord::from(&layout);
        assert!(record.formatted);
        assert_eq!(record.slot(SlotId::NorFlash).reboot_counter, 0);
        assert!(!record.slot(SlotId::NorFlash).counter_initialized);
    }

    #[test]
    fn test_advance_counter_wraps_at_limit() {
        let mut slot = BootRecordLayout::blank().slots[0];
        assert_eq!(slot.advance_counter(3), CounterStep::Advanced(1));
        assert_eq!(slot.advance_counter(3), CounterStep::Advanced(2));
        assert_eq!(slot.advance_counter(3), CounterStep::Advanced(3));
        assert_eq!(slot.advance_counter(3), CounterStep::Wrapped(1));
        assert_eq!(slot.counter(), 1);
        slot.reset_counter();
        assert_eq!(slot.counter(), 0);
        assert!(slot.counter_initialized());
    }

    #[test]
    fn test_slot_image_info_roundtrip() {
        let mut layout = BootRecordLayout::blank();
        SlotImageInfo {
            binary_size: 0x1234,
            hamming_code_size: 57,
            hamming_enabled: true,
            image_crc: Some(0xbeef),
        }
        .apply(layout.slot_mut(SlotId::Sdc1Slot1));
        let info = *BootRecord::from(&layout).slot(SlotId::Sdc1Slot1);
        assert_eq!(info.binary_size, 0x1234);
        assert_eq!(info.hamming_code_size, 57);
        assert!(info.hamming_enabled);
        assert_eq!(info.image_crc, Some(0xbeef));
    }

    #[test]
    fn test_hamming_regions_stack_down_from_end() {
        let fram_size = 0x4_0000;
        let bl = hamming_region(SlotId::BootloaderPrimary, fram_size).unwrap();
        assert_eq!(bl.address, fram_size - 0x600);
        let nor = hamming_region(SlotId::NorFlash, fram_size).unwrap();
        assert_eq!(nor.address, fram_size - 0x600 * 2 - 0x2A00);
        assert_eq!(nor.capacity, IMAGES_HAMMING_RESERVED_SIZE);
        let last = hamming_region(SlotId::Sdc1Slot1, fram_size).unwrap();
        assert_eq!(Ok(last.address), hamming_regions_start(fram_size));
    }

    #[test]
    fn test_hamming_regions_need_room() {
        assert_eq!(
            hamming_region(SlotId::BootloaderPrimary, 0x100),
            Err(ImageError::FramTooSmall)
        );
        // The first regions fit, the last image slot does not.
        let fram_size = 0x600 * 2 + 0x2A00 * 2;
        assert!(hamming_region(SlotId::Sdc0Slot0, fram_size).is_ok());
        assert_eq!(
            hamming_region(SlotId::Sdc1Slot1, fram_size),
            Err(ImageError::FramTooSmall)
        );
        assert_eq!(hamming_regions_start(fram_size), Err(ImageError::FramTooSmall));
    }
}
