// Licensed under the Apache-2.0 license

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Number of slots tracked by the boot record.
pub const SLOT_COUNT: usize = 7;

/// Directory holding the on-board software images on each SD card.
pub const SW_REPOSITORY: &str = "BIN/OBSW";
/// Directory holding the bootloader images on each SD card.
pub const BOOTLOADER_REPOSITORY: &str = "BIN/BL";

pub const SW_SLOT_0_NAME: &str = "obsw_sl0.bin";
pub const SW_SLOT_1_NAME: &str = "obsw_sl1.bin";
pub const SW_SLOT_0_HAMMING_NAME: &str = "obsw_sl0_ham.bin";
pub const SW_SLOT_1_HAMMING_NAME: &str = "obsw_sl1_ham.bin";
pub const SW_NOR_HAMMING_NAME: &str = "obsw_nor_ham.bin";
pub const BOOTLOADER_NAME: &str = "bl.bin";
pub const BOOTLOADER_HAMMING_NAME: &str = "bl_ham.bin";
pub const SECOND_STAGE_BOOTLOADER_NAME: &str = "bl2.bin";

/// Identifies every independently addressable image location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SlotId {
    BootloaderPrimary = 0,
    BootloaderSecondary = 1,
    NorFlash = 2,
    Sdc0Slot0 = 3,
    Sdc0Slot1 = 4,
    Sdc1Slot0 = 5,
    Sdc1Slot1 = 6,
}

/// One of the two redundant SD cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SdCard {
    Sd0 = 0,
    Sd1 = 1,
}

impl SdCard {
    pub fn other(self) -> SdCard {
        match self {
            SdCard::Sd0 => SdCard::Sd1,
            SdCard::Sd1 => SdCard::Sd0,
        }
    }

    /// Slot `index` (0 or 1) on this card.
    pub fn slot(self, index: u8) -> Option<SlotId> {
        match (self, index) {
            (SdCard::Sd0, 0) => Some(SlotId::Sdc0Slot0),
            (SdCard::Sd0, 1) => Some(SlotId::Sdc0Slot1),
            (SdCard::Sd1, 0) => Some(SlotId::Sdc1Slot0),
            (SdCard::Sd1, 1) => Some(SlotId::Sdc1Slot1),
            _ => None,
        }
    }
}

impl SlotId {
    pub const ALL: [SlotId; SLOT_COUNT] = [
        SlotId::BootloaderPrimary,
        SlotId::BootloaderSecondary,
        SlotId::NorFlash,
        SlotId::Sdc0Slot0,
        SlotId::Sdc0Slot1,
        SlotId::Sdc1Slot0,
        SlotId::Sdc1Slot1,
    ];

    /// Position of the slot inside the persisted record.
    pub fn index(self) -> usize {
        u8::from(self) as usize
    }

    pub fn is_bootloader(self) -> bool {
        matches!(self, SlotId::BootloaderPrimary | SlotId::BootloaderSecondary)
    }

    pub fn is_sd_card(self) -> bool {
        self.sd_card().is_some()
    }

    pub fn sd_card(self) -> Option<SdCard> {
        match self {
            SlotId::Sdc0Slot0 | SlotId::Sdc0Slot1 => Some(SdCard::Sd0),
            SlotId::Sdc1Slot0 | SlotId::Sdc1Slot1 => Some(SdCard::Sd1),
            _ => None,
        }
    }

    /// Slot number on the SD card, 0 or 1.
    pub fn sd_slot_index(self) -> Option<u8> {
        match self {
            SlotId::Sdc0Slot0 | SlotId::Sdc1Slot0 => Some(0),
            SlotId::Sdc0Slot1 | SlotId::Sdc1Slot1 => Some(1),
            _ => None,
        }
    }

    /// Image file name of an SD card slot inside [`SW_REPOSITORY`].
    pub fn image_file_name(self) -> Option<&'static str> {
        match self.sd_slot_index()? {
            0 => Some(SW_SLOT_0_NAME),
            _ => Some(SW_SLOT_1_NAME),
        }
    }

    /// Hamming code file name on SD card for the image stored in this slot.
    pub fn hamming_file_name(self) -> &'static str {
        match self {
            SlotId::BootloaderPrimary | SlotId::BootloaderSecondary => BOOTLOADER_HAMMING_NAME,
            SlotId::NorFlash => SW_NOR_HAMMING_NAME,
            SlotId::Sdc0Slot0 | SlotId::Sdc1Slot0 => SW_SLOT_0_HAMMING_NAME,
            SlotId::Sdc0Slot1 | SlotId::Sdc1Slot1 => SW_SLOT_1_HAMMING_NAME,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SlotId::BootloaderPrimary => "bootloader-primary",
            SlotId::BootloaderSecondary => "bootloader-secondary",
            SlotId::NorFlash => "nor-flash",
            SlotId::Sdc0Slot0 => "sdc0-slot0",
            SlotId::Sdc0Slot1 => "sdc0-slot1",
            SlotId::Sdc1Slot0 => "sdc1-slot0",
            SlotId::Sdc1Slot1 => "sdc1-slot1",
        }
    }
}

impl core::fmt::Display for SlotId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
