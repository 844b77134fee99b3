// Licensed under the Apache-2.0 license
#![allow(dead_code)]

use boot_image::{hamming_region, BootRecord, SdCard, SlotId, SlotImageInfo};
use core::cell::Cell;
use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::LevelFilter;
use obc_bootloader::record::SharedBootRecordStore;
use obc_config::{BootRecordStoreAsync, HandlerConfig, ObcMemoryMap};
use obc_image_handler::{Countdown, HandlerError, OperationStatus, SoftwareImageHandler};
use obc_testing::image::image_crc;
use obc_testing::{MemFileSystem, MemFlash, MemFram, NeverExpires};
use simple_logger::SimpleLogger;

pub type Store = SharedBootRecordStore<CriticalSectionRawMutex, MemFram, NeverExpires>;
pub type Handler<'a> = SoftwareImageHandler<'a, MemFileSystem, Store>;

const MAX_PERIODS: usize = 1000;

/// Countdown that expires after it was polled `budget` times.
pub struct StepBudget {
    polls: Cell<usize>,
    budget: usize,
}

impl StepBudget {
    pub fn new(budget: usize) -> Self {
        StepBudget {
            polls: Cell::new(0),
            budget,
        }
    }
}

impl Countdown for StepBudget {
    fn has_timed_out(&self) -> bool {
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        polls >= self.budget
    }
}

pub struct Fixture {
    pub map: ObcMemoryMap,
    pub flash: MemFlash,
    pub store: Store,
}

pub fn setup() -> Fixture {
    let _ = SimpleLogger::new().with_level(LevelFilter::Debug).init();

    let map = ObcMemoryMap::default();
    let config = HandlerConfig::default();
    Fixture {
        flash: MemFlash::erased(map.nor_size as usize),
        store: SharedBootRecordStore::new(
            MemFram::erased(map.fram_size as usize),
            map.boot_record_offset,
            NeverExpires,
            config.record_timeout_ms,
        ),
        map,
    }
}

impl Fixture {
    pub fn handler(&self, fs: MemFileSystem, step_size: usize) -> Handler<'_> {
        SoftwareImageHandler::new(
            fs,
            &self.flash,
            &self.store,
            self.map,
            HandlerConfig {
                step_size,
                ..Default::default()
            },
        )
    }

    pub fn record(&self) -> BootRecord {
        block_on(self.store.read_record()).unwrap()
    }

    pub fn record_image(&self, slot: SlotId, image: &[u8]) {
        let info = SlotImageInfo {
            binary_size: image.len() as u32,
            hamming_code_size: 0,
            hamming_enabled: false,
            image_crc: Some(image_crc(image)),
        };
        block_on(self.store.write_slot_image_info(slot, &info)).unwrap();
    }

    /// Contents of a NOR partition.
    pub fn partition(&self, slot: SlotId, len: usize) -> Vec<u8> {
        let (offset, _) = self.map.nor_partition(slot).unwrap();
        self.flash.contents(offset as usize, len)
    }
}

/// FRAM Hamming code region contents of `slot`.
pub fn stored_hamming_code(fram: &MemFram, map: &ObcMemoryMap, slot: SlotId, len: usize) -> Vec<u8> {
    let region = hamming_region(slot, map.fram_size).unwrap();
    fram.memory()[region.address as usize..][..len].to_vec()
}

/// A file system holding `files` as `(volume, path, contents)`.
pub fn filesystem(files: &[(SdCard, &str, &[u8])]) -> MemFileSystem {
    let mut fs = MemFileSystem::new();
    for (volume, path, data) in files {
        fs.add_file(*volume, path, data);
    }
    fs
}

/// Runs the active operation period by period, each with `budget` polls.
pub fn run_to_end(
    handler: &mut Handler<'_>,
    budget: usize,
) -> (usize, Result<OperationStatus, HandlerError>) {
    for period in 1..=MAX_PERIODS {
        match block_on(handler.perform_operation(&StepBudget::new(budget))) {
            Ok(OperationStatus::TaskPeriodOverSoon) => continue,
            other => return (period, other),
        }
    }
    panic!("operation did not finish in {} periods", MAX_PERIODS);
}
