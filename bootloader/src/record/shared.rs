// Licensed under the Apache-2.0 license

use super::{counter_result, hamming_code_address};
use crate::fram::{FramBusAsync, FramError};
use boot_image::{
    bool_byte, BootRecord, BootRecordLayout, SlotId, SlotImageInfo, COUNTER_FIELD_LEN,
    DEFAULT_COUNTER_LIMIT, FRAM_UNINITIALIZED,
};
use core::future::Future;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embedded_hal_async::delay::DelayNs;
use log::{debug, warn};
use obc_config::{BootRecordStoreAsync, RecordError};
use zerocopy::{FromZeros, IntoBytes};

struct RecordAccess<B: FramBusAsync> {
    bus: B,
    record_address: u32,
    counter_limit: u16,
}

impl<B: FramBusAsync> RecordAccess<B> {
    async fn read_layout(&mut self) -> Result<BootRecordLayout, FramError> {
        let mut layout = BootRecordLayout::new_zeroed();
        self.bus
            .read(self.record_address, layout.as_mut_bytes())
            .await?;
        Ok(layout)
    }

    async fn read_formatted(&mut self) -> Result<BootRecordLayout, FramError> {
        let layout = self.read_layout().await?;
        if layout.is_formatted() {
            return Ok(layout);
        }
        warn!("Boot record not formatted, writing blank record");
        let blank = BootRecordLayout::blank();
        self.bus.write(self.record_address, blank.as_bytes()).await?;
        Ok(blank)
    }

    async fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<(), FramError> {
        self.bus
            .write(self.record_address + offset as u32, data)
            .await
    }

    async fn update_counter(
        &mut self,
        slot: SlotId,
        reset: bool,
    ) -> Result<Result<u16, RecordError>, FramError> {
        let mut layout = self.read_formatted().await?;
        let entry = layout.slot_mut(slot);
        let result = if reset {
            entry.reset_counter();
            Ok(0)
        } else {
            counter_result(entry.advance_counter(self.counter_limit))
        };
        self.write_at(
            BootRecordLayout::counter_offset(slot),
            layout.slot(slot).counter_bytes(),
        )
        .await?;
        Ok(result)
    }

    async fn write_slot_image_info(
        &mut self,
        slot: SlotId,
        info: &SlotImageInfo,
    ) -> Result<(), FramError> {
        let mut layout = self.read_formatted().await?;
        info.apply(layout.slot_mut(slot));
        self.write_at(
            BootRecordLayout::hamming_flag_offset(slot),
            &layout.slot(slot).as_bytes()[COUNTER_FIELD_LEN..],
        )
        .await
    }

    async fn write_byte_fields(&mut self, offset: usize, bytes: &[u8]) -> Result<(), FramError> {
        self.read_formatted().await?;
        self.write_at(offset, bytes).await
    }
}

/// Boot record store shared between flight software tasks.
///
/// Access is serialized by an async mutex so read-modify-write updates never
/// overlap and at most one FRAM transfer is in flight. Both acquiring the
/// mutex and the transfer itself are bounded by `timeout_ms`; a transfer that
/// runs out of time is aborted and reported as `RecordError::TransferTimeout`.
pub struct SharedBootRecordStore<M: RawMutex, B: FramBusAsync, D: DelayNs + Clone> {
    access: Mutex<M, RecordAccess<B>>,
    delay: D,
    timeout_ms: u32,
}

impl<M: RawMutex, B: FramBusAsync, D: DelayNs + Clone> SharedBootRecordStore<M, B, D> {
    pub fn new(bus: B, record_address: u32, delay: D, timeout_ms: u32) -> Self {
        SharedBootRecordStore {
            access: Mutex::new(RecordAccess {
                bus,
                record_address,
                counter_limit: DEFAULT_COUNTER_LIMIT,
            }),
            delay,
            timeout_ms,
        }
    }

    pub fn with_counter_limit(mut self, counter_limit: u16) -> Self {
        self.access.get_mut().counter_limit = counter_limit;
        self
    }

    /// Releases the FRAM bus.
    pub fn into_bus(self) -> B {
        self.access.into_inner().bus
    }

    async fn lock(&self) -> Result<MutexGuard<'_, M, RecordAccess<B>>, RecordError> {
        let mut delay = self.delay.clone();
        match select(self.access.lock(), delay.delay_ms(self.timeout_ms)).await {
            Either::First(guard) => Ok(guard),
            Either::Second(()) => {
                warn!("Boot record store busy, giving up");
                Err(RecordError::TransferTimeout)
            }
        }
    }

    async fn bounded<T>(
        &self,
        transfer: impl Future<Output = Result<T, FramError>>,
    ) -> Result<T, RecordError> {
        let mut delay = self.delay.clone();
        match select(transfer, delay.delay_ms(self.timeout_ms)).await {
            Either::First(result) => Ok(result?),
            Either::Second(()) => Err(RecordError::TransferTimeout),
        }
    }
}

/// Aborts the bus transfer when the bounded operation ran out of time.
fn settle<B: FramBusAsync, T>(
    access: &mut RecordAccess<B>,
    result: Result<T, RecordError>,
) -> Result<T, RecordError> {
    if let Err(RecordError::TransferTimeout) = result {
        access.bus.abort();
    }
    result
}

impl<M: RawMutex, B: FramBusAsync, D: DelayNs + Clone> BootRecordStoreAsync
    for SharedBootRecordStore<M, B, D>
{
    async fn read_record(&self) -> Result<BootRecord, RecordError> {
        let mut access = self.lock().await?;
        let result = self.bounded(access.read_layout()).await;
        settle(&mut access, result).map(|layout| BootRecord::from(&layout))
    }

    async fn increment_reboot_counter(&self, slot: SlotId) -> Result<u16, RecordError> {
        let mut access = self.lock().await?;
        let result = self.bounded(access.update_counter(slot, false)).await;
        let value = settle(&mut access, result)?;
        debug!("Reboot counter of {} incremented: {:?}", slot, value);
        value
    }

    async fn reset_reboot_counter(&self, slot: SlotId) -> Result<(), RecordError> {
        let mut access = self.lock().await?;
        let result = self.bounded(access.update_counter(slot, true)).await;
        settle(&mut access, result)?.map(|_| ())
    }

    async fn get_reboot_counter(&self, slot: SlotId) -> Result<u16, RecordError> {
        Ok(self.read_record().await?.slot(slot).reboot_counter)
    }

    async fn get_hamming_flag(&self, slot: SlotId) -> Result<bool, RecordError> {
        Ok(self.read_record().await?.slot(slot).hamming_enabled)
    }

    async fn set_hamming_flag(&self, slot: SlotId, enabled: bool) -> Result<(), RecordError> {
        let mut access = self.lock().await?;
        let result = self
            .bounded(access.write_byte_fields(
                BootRecordLayout::hamming_flag_offset(slot),
                &[bool_byte(enabled)],
            ))
            .await;
        settle(&mut access, result)
    }

    async fn set_global_hamming_flag(&self, enabled: bool) -> Result<(), RecordError> {
        let mut access = self.lock().await?;
        let result = self
            .bounded(access.write_byte_fields(
                BootRecordLayout::global_hamming_offset(),
                &[bool_byte(enabled)],
            ))
            .await;
        settle(&mut access, result)
    }

    async fn write_slot_image_info(
        &self,
        slot: SlotId,
        info: &SlotImageInfo,
    ) -> Result<(), RecordError> {
        let mut access = self.lock().await?;
        let result = self.bounded(access.write_slot_image_info(slot, info)).await;
        settle(&mut access, result)
    }

    async fn write_hamming_code(
        &self,
        slot: SlotId,
        offset: u32,
        data: &[u8],
    ) -> Result<(), RecordError> {
        let mut access = self.lock().await?;
        let address = hamming_code_address(slot, offset, data.len(), access.bus.size())?;
        let result = self.bounded(access.bus.write(address, data)).await;
        settle(&mut access, result)
    }

    async fn set_pending_update(&self, slot: Option<SlotId>) -> Result<(), RecordError> {
        let bytes = [
            bool_byte(slot.is_some()),
            slot.map_or(FRAM_UNINITIALIZED, u8::from),
        ];
        let mut access = self.lock().await?;
        let result = self
            .bounded(access.write_byte_fields(BootRecordLayout::update_offset(), &bytes))
            .await;
        settle(&mut access, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    const FRAM_SIZE: u32 = 0x4_0000;

    struct RamFram {
        memory: Vec<u8>,
        hang: bool,
        aborted: usize,
    }

    impl FramBusAsync for RamFram {
        async fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FramError> {
            if self.hang {
                core::future::pending::<()>().await;
            }
            let start = address as usize;
            buf.copy_from_slice(&self.memory[start..start + buf.len()]);
            Ok(())
        }

        async fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FramError> {
            if self.hang {
                core::future::pending::<()>().await;
            }
            let start = address as usize;
            self.memory[start..start + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn abort(&mut self) {
            self.aborted += 1;
        }

        fn size(&self) -> u32 {
            FRAM_SIZE
        }
    }

    /// Never expires.
    #[derive(Clone)]
    struct NoTimeout;

    impl DelayNs for NoTimeout {
        async fn delay_ns(&mut self, _ns: u32) {
            core::future::pending::<()>().await
        }
    }

    /// Expires as soon as it is polled.
    #[derive(Clone)]
    struct ImmediateTimeout;

    impl DelayNs for ImmediateTimeout {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    fn ram(hang: bool) -> RamFram {
        RamFram {
            memory: vec![FRAM_UNINITIALIZED; FRAM_SIZE as usize],
            hang,
            aborted: 0,
        }
    }

    #[test]
    fn test_shared_counter_updates() {
        let store: SharedBootRecordStore<CriticalSectionRawMutex, _, _> =
            SharedBootRecordStore::new(ram(false), 0, NoTimeout, 20);
        block_on(async {
            assert_eq!(store.increment_reboot_counter(SlotId::NorFlash).await, Ok(1));
            assert_eq!(store.increment_reboot_counter(SlotId::NorFlash).await, Ok(2));
            assert_eq!(store.get_reboot_counter(SlotId::NorFlash).await, Ok(2));
            store.reset_reboot_counter(SlotId::NorFlash).await.unwrap();
            assert_eq!(store.get_reboot_counter(SlotId::NorFlash).await, Ok(0));

            store.set_hamming_flag(SlotId::Sdc0Slot0, true).await.unwrap();
            assert_eq!(store.get_hamming_flag(SlotId::Sdc0Slot0).await, Ok(true));
            store.set_global_hamming_flag(true).await.unwrap();
            assert!(store.read_record().await.unwrap().global_hamming);
            store.set_pending_update(Some(SlotId::Sdc0Slot1)).await.unwrap();
            assert_eq!(
                store.read_record().await.unwrap().pending_update,
                Some(SlotId::Sdc0Slot1)
            );
        });
    }

    #[test]
    fn test_hanging_transfer_times_out() {
        let mut store: SharedBootRecordStore<CriticalSectionRawMutex, _, _> =
            SharedBootRecordStore::new(ram(true), 0, ImmediateTimeout, 20);
        let result = block_on(store.increment_reboot_counter(SlotId::NorFlash));
        assert_eq!(result, Err(RecordError::TransferTimeout));
        assert_eq!(store.access.get_mut().bus.aborted, 1);
    }

    #[test]
    fn test_busy_store_times_out() {
        let store: SharedBootRecordStore<CriticalSectionRawMutex, _, _> =
            SharedBootRecordStore::new(ram(false), 0, ImmediateTimeout, 20);
        let _held = store.access.try_lock().unwrap();
        let result = block_on(store.read_record());
        assert_eq!(result, Err(RecordError::TransferTimeout));
    }
}
