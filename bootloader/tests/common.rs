// Licensed under the Apache-2.0 license
#![allow(dead_code)]

use boot_image::{SlotId, SlotImageInfo, SW_REPOSITORY};
use log::LevelFilter;
use obc_bootloader::record::FramBootRecordStore;
use obc_bootloader::source::{FlashSource, ImageSource, SdCardSource};
use obc_bootloader::{BootOutcome, BootResources, BootSelector};
use obc_config::{BootConfig, BootRecordStore, ObcMemoryMap};
use obc_testing::image::{hamming_code, image_crc};
use obc_testing::{
    CountingWatchdog, MemFileSystem, MemFlash, MemFram, RamExecMemory, RecordingReporter,
    TEST_EXEC_BASE,
};
use simple_logger::SimpleLogger;

pub const EXEC_SIZE: usize = 0x1_0000;

/// Every peripheral the selector touches, held in memory.
pub struct Board {
    pub map: ObcMemoryMap,
    pub store: FramBootRecordStore<MemFram>,
    pub flash: MemFlash,
    pub sd: SdCardSource<MemFileSystem>,
    pub memory: RamExecMemory,
    pub watchdog: CountingWatchdog,
    pub reporter: RecordingReporter,
}

pub fn setup() -> Board {
    let _ = SimpleLogger::new().with_level(LevelFilter::Debug).init();

    let map = ObcMemoryMap::default();
    Board {
        store: FramBootRecordStore::new(
            MemFram::erased(map.fram_size as usize),
            map.boot_record_offset,
        ),
        flash: MemFlash::erased(map.nor_size as usize),
        sd: SdCardSource::new(MemFileSystem::new()),
        memory: RamExecMemory::new(TEST_EXEC_BASE, EXEC_SIZE),
        watchdog: CountingWatchdog::default(),
        reporter: RecordingReporter::default(),
        map,
    }
}

impl Board {
    /// Records `image` for `slot` and, with `hamming`, stores its code in FRAM.
    pub fn record_image(&mut self, slot: SlotId, image: &[u8], hamming: bool) {
        let code = hamming_code(image);
        let info = SlotImageInfo {
            binary_size: image.len() as u32,
            hamming_code_size: if hamming { code.len() as u32 } else { 0 },
            hamming_enabled: hamming,
            image_crc: Some(image_crc(image)),
        };
        self.store.write_slot_image_info(slot, &info).unwrap();
        if hamming {
            self.store.write_hamming_code(slot, 0, &code).unwrap();
            self.store.set_global_hamming_flag(true).unwrap();
        }
    }

    /// Programs `image` into the NOR partition of a flash slot.
    pub fn install_flash(&mut self, slot: SlotId, image: &[u8], hamming: bool) {
        let (offset, _) = self.map.nor_partition(slot).unwrap();
        self.flash.load(offset as usize, image);
        self.record_image(slot, image, hamming);
    }

    /// Stores `image` as the file of an SD card slot.
    pub fn install_sd(&mut self, slot: SlotId, image: &[u8], hamming: bool) {
        let path = sd_path(slot);
        self.sd
            .filesystem_mut()
            .add_file(slot.sd_card().unwrap(), &path, image);
        self.record_image(slot, image, hamming);
    }

    pub fn nor_image_offset(&self) -> usize {
        self.map.nor_image_offset() as usize
    }

    pub fn counter(&mut self, slot: SlotId) -> u16 {
        self.store.read_record().unwrap().slot(slot).reboot_counter
    }

    pub fn boot(&mut self, config: BootConfig) -> BootOutcome {
        self.with_selector(config, |selector| selector.run())
    }

    pub fn with_selector<R>(
        &mut self,
        config: BootConfig,
        f: impl FnOnce(&mut BootSelector<'_>) -> R,
    ) -> R {
        let mut flash =
            FlashSource::from_memory_map(&self.flash, &self.map, config.nor_size_fallback)
                .unwrap();
        let mut sources: [&mut dyn ImageSource; 2] = [&mut flash, &mut self.sd];
        let mut selector = BootSelector::new(
            config,
            BootResources {
                store: &mut self.store,
                sources: &mut sources,
                memory: &mut self.memory,
                watchdog: &mut self.watchdog,
                reporter: Some(&mut self.reporter),
            },
        );
        f(&mut selector)
    }
}

pub fn sd_path(slot: SlotId) -> String {
    format!("{}/{}", SW_REPOSITORY, slot.image_file_name().unwrap())
}

pub fn booted_slot(outcome: &BootOutcome) -> Option<SlotId> {
    match outcome {
        BootOutcome::Ready(image) => Some(image.slot()),
        BootOutcome::Exhausted => None,
    }
}
