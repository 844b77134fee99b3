// Licensed under the Apache-2.0 license

use super::{readable_len, ImageDescriptor, ImageSource, SourceError, SourceMedium};
use crate::flash::{FlashDrvError, FlashPartition, FlashStorage};
use boot_image::{BootRecord, SlotId};
use heapless::Vec;
use log::warn;
use obc_config::ObcMemoryMap;

const MAX_FLASH_SLOTS: usize = 3;

/// Slots stored in NOR flash partitions.
pub struct FlashSource<'a> {
    partitions: Vec<(SlotId, FlashPartition<'a>), MAX_FLASH_SLOTS>,
    nor_offset: u32,
    size_fallback: bool,
}

impl<'a> FlashSource<'a> {
    /// `size_fallback` makes the NOR image span its whole partition when the
    /// boot record is unusable.
    pub fn new(nor_offset: u32, size_fallback: bool) -> Self {
        FlashSource {
            partitions: Vec::new(),
            nor_offset,
            size_fallback,
        }
    }

    pub fn from_memory_map(
        driver: &'a dyn FlashStorage,
        map: &ObcMemoryMap,
        size_fallback: bool,
    ) -> Result<Self, FlashDrvError> {
        let mut source = Self::new(map.nor_offset, size_fallback);
        for slot in [
            SlotId::BootloaderPrimary,
            SlotId::BootloaderSecondary,
            SlotId::NorFlash,
        ] {
            if let Some((offset, length)) = map.nor_partition(slot) {
                let partition =
                    FlashPartition::new(driver, slot.name(), offset as usize, length as usize)?;
                source.add_partition(slot, partition)?;
            }
        }
        Ok(source)
    }

    pub fn add_partition(
        &mut self,
        slot: SlotId,
        partition: FlashPartition<'a>,
    ) -> Result<(), FlashDrvError> {
        self.partitions
            .push((slot, partition))
            .map_err(|_| FlashDrvError::NOMEM)
    }

    fn partition(&self, slot: SlotId) -> Option<&FlashPartition<'a>> {
        self.partitions
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, p)| p)
    }
}

impl ImageSource for FlashSource<'_> {
    fn serves(&self, slot: SlotId) -> bool {
        self.partition(slot).is_some()
    }

    fn locate(&mut self, slot: SlotId, record: &BootRecord) -> Result<ImageDescriptor, SourceError> {
        let partition = self.partition(slot).ok_or(SourceError::Unavailable)?;
        let info = record.slot(slot);
        let size = if !record.formatted && self.size_fallback && slot == SlotId::NorFlash {
            warn!("No usable boot record, copying the whole {} partition", partition.name());
            partition.len() as u32
        } else {
            info.binary_size
        };
        if size as usize > partition.len() {
            warn!(
                "Recorded size {} of {} exceeds its partition",
                size,
                partition.name()
            );
            return Err(SourceError::Unavailable);
        }
        Ok(ImageDescriptor::new(
            slot,
            SourceMedium::NorFlash,
            self.nor_offset + partition.base_offset() as u32,
            size,
            info,
        ))
    }

    fn read(
        &mut self,
        descriptor: &ImageDescriptor,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<usize, SourceError> {
        let partition = self
            .partition(descriptor.slot)
            .ok_or(SourceError::NotLocated)?;
        let len = readable_len(descriptor.size, offset, buf.len())?;
        partition.read(offset as usize, &mut buf[..len])?;
        Ok(len)
    }

    fn release(&mut self, _descriptor: &ImageDescriptor) {}
}
