// Licensed under the Apache-2.0 license

#![cfg_attr(target_arch = "arm", no_std)]

mod boot;
pub use boot::*;

use boot_image::{SlotId, DEFAULT_COUNTER_LIMIT, HAMMING_BLOCK_SIZE};

/// Configures the memory map of the on-board computer.
/// These are the defaults of the iOBC board and can be overridden by the
/// bootloader and flight software builds.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObcMemoryMap {
    pub nor_offset: u32,
    pub nor_size: u32,
    pub bootloader_reserved_size: u32,
    pub second_stage_reserved_size: u32,
    pub sdram_offset: u32,
    pub sdram_size: u32,
    pub exec_size: u32,
    pub sram_offset: u32,
    pub sram_size: u32,
    pub boot_status_offset: u32,
    pub fram_size: u32,
    pub boot_record_offset: u32,
}

impl Default for ObcMemoryMap {
    fn default() -> Self {
        ObcMemoryMap {
            nor_offset: 0x1000_0000,
            nor_size: 0x10_0000,
            bootloader_reserved_size: 0x1_0000,
            second_stage_reserved_size: 0x1_0000,
            sdram_offset: 0x2000_0000,
            sdram_size: 0x0200_0000,
            exec_size: 0x0100_0000,
            sram_offset: 0x0020_0000,
            sram_size: 0x4000,
            boot_status_offset: 0x0020_3ff0,
            fram_size: 0x4_0000,
            boot_record_offset: 0x0,
        }
    }
}

impl ObcMemoryMap {
    /// NOR offset of the second stage bootloader.
    pub fn second_stage_offset(&self) -> u32 {
        self.bootloader_reserved_size
    }

    /// NOR offset of the on-board software image.
    pub fn nor_image_offset(&self) -> u32 {
        self.bootloader_reserved_size + self.second_stage_reserved_size
    }

    /// SDRAM `(address, length)` images are copied to and started from.
    pub fn execution_region(&self) -> Option<(u32, u32)> {
        (self.exec_size <= self.sdram_size).then_some((self.sdram_offset, self.exec_size))
    }

    /// SRAM address of a boot status field of `len` bytes, if it fits.
    pub fn boot_status_address(&self, len: u32) -> Option<u32> {
        let end = self.boot_status_offset.checked_add(len)?;
        let in_sram = self.boot_status_offset >= self.sram_offset
            && end <= self.sram_offset.checked_add(self.sram_size)?;
        in_sram.then_some(self.boot_status_offset)
    }

    pub fn nor_image_size(&self) -> u32 {
        self.nor_size - self.nor_image_offset()
    }

    /// NOR partition `(offset, length)` backing a flash slot.
    pub fn nor_partition(&self, slot: SlotId) -> Option<(u32, u32)> {
        match slot {
            SlotId::BootloaderPrimary => Some((0, self.bootloader_reserved_size)),
            SlotId::BootloaderSecondary => {
                Some((self.second_stage_offset(), self.second_stage_reserved_size))
            }
            SlotId::NorFlash => Some((self.nor_image_offset(), self.nor_image_size())),
            _ => None,
        }
    }
}

/// Boot stage the selector runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    /// Loads the second stage bootloader.
    FirstStage,
    /// Loads the on-board software.
    SecondStage,
}

impl BootStage {
    /// Whether images of `slot` are started by this stage.
    pub fn loads(self, slot: SlotId) -> bool {
        match self {
            BootStage::FirstStage => slot.is_bootloader(),
            BootStage::SecondStage => !slot.is_bootloader(),
        }
    }
}

pub const FIRST_STAGE_CANDIDATE_ORDER: [SlotId; 1] = [SlotId::BootloaderSecondary];

pub const SECOND_STAGE_CANDIDATE_ORDER: [SlotId; 5] = [
    SlotId::NorFlash,
    SlotId::Sdc0Slot0,
    SlotId::Sdc0Slot1,
    SlotId::Sdc1Slot0,
    SlotId::Sdc1Slot1,
];

pub const DEFAULT_CHUNK_SIZE: usize = 2048;
const _: () = assert!(DEFAULT_CHUNK_SIZE % HAMMING_BLOCK_SIZE == 0);

/// Boot selection and copy policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    pub stage: BootStage,
    /// Candidates in priority order.
    pub candidate_order: &'static [SlotId],
    /// Copy chunk size, a multiple of the Hamming block size.
    pub chunk_size: usize,
    /// Re-attempts of a failed transfer before giving up on a candidate.
    pub transfer_retries: u8,
    /// Reboot counters wrap back to 1 past this value.
    pub counter_limit: u16,
    /// Slots whose reboot counter exceeds this value are tried last.
    pub demote_threshold: Option<u16>,
    /// Try a slot holding a pending software update first.
    pub honor_pending_update: bool,
    /// Order the slots of the preferred SD card before the other card.
    pub honor_preferred_sd_card: bool,
    /// Copy the whole NOR partition when the record is unusable.
    pub nor_size_fallback: bool,
    /// Build-time switch for Hamming decoding. The record's global flag is
    /// checked as well.
    pub hamming_enabled: bool,
}

impl BootConfig {
    pub fn for_stage(stage: BootStage) -> Self {
        let candidate_order: &'static [SlotId] = match stage {
            BootStage::FirstStage => &FIRST_STAGE_CANDIDATE_ORDER,
            BootStage::SecondStage => &SECOND_STAGE_CANDIDATE_ORDER,
        };
        BootConfig {
            stage,
            candidate_order,
            chunk_size: DEFAULT_CHUNK_SIZE,
            transfer_retries: 1,
            counter_limit: DEFAULT_COUNTER_LIMIT,
            demote_threshold: None,
            honor_pending_update: true,
            honor_preferred_sd_card: true,
            nor_size_fallback: true,
            hamming_enabled: true,
        }
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::for_stage(BootStage::SecondStage)
    }
}

/// Settings of the flight software image handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Task period of the image handler.
    pub task_period_ms: u32,
    /// Share of the period in percent an operation may use before yielding.
    pub period_budget_percent: u32,
    /// Failed reads tolerated before an operation is aborted.
    pub max_read_errors: u8,
    /// Bytes moved per copy step.
    pub step_size: usize,
    /// Bound for acquiring the record store and completing a FRAM transfer.
    pub record_timeout_ms: u32,
}

impl HandlerConfig {
    pub fn period_budget_ms(&self) -> u32 {
        self.task_period_ms * self.period_budget_percent / 100
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig {
            task_period_ms: 400,
            period_budget_percent: 75,
            max_read_errors: 3,
            step_size: DEFAULT_CHUNK_SIZE,
            record_timeout_ms: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nor_partitions_are_contiguous() {
        let map = ObcMemoryMap::default();
        let (bl, bl_len) = map.nor_partition(SlotId::BootloaderPrimary).unwrap();
        let (bl2, bl2_len) = map.nor_partition(SlotId::BootloaderSecondary).unwrap();
        let (img, img_len) = map.nor_partition(SlotId::NorFlash).unwrap();
        assert_eq!(bl + bl_len, bl2);
        assert_eq!(bl2 + bl2_len, img);
        assert_eq!(img + img_len, map.nor_size);
        assert_eq!(map.nor_partition(SlotId::Sdc0Slot0), None);
    }

    #[test]
    fn test_ram_regions() {
        let map = ObcMemoryMap::default();
        assert_eq!(map.execution_region(), Some((0x2000_0000, 0x0100_0000)));
        assert_eq!(map.boot_status_address(8), Some(0x0020_3ff0));
        assert_eq!(map.boot_status_address(0x20), None);

        let map = ObcMemoryMap {
            exec_size: 0x0400_0000,
            boot_status_offset: 0x0010_0000,
            ..ObcMemoryMap::default()
        };
        assert_eq!(map.execution_region(), None);
        assert_eq!(map.boot_status_address(8), None);
    }

    #[test]
    fn test_stage_loads() {
        assert!(BootStage::FirstStage.loads(SlotId::BootloaderSecondary));
        assert!(!BootStage::FirstStage.loads(SlotId::NorFlash));
        assert!(BootStage::SecondStage.loads(SlotId::Sdc1Slot1));
        assert!(!BootStage::SecondStage.loads(SlotId::BootloaderPrimary));
    }

    #[test]
    fn test_default_boot_config() {
        let config = BootConfig::default();
        assert_eq!(config.candidate_order, &SECOND_STAGE_CANDIDATE_ORDER);
        assert_eq!(config.chunk_size % HAMMING_BLOCK_SIZE, 0);
        assert_eq!(config.transfer_retries, 1);
        assert_eq!(config.demote_threshold, None);
        assert_eq!(HandlerConfig::default().period_budget_ms(), 300);
    }
}
