/*++

Licensed under the Apache-2.0 license.

File Name:

    handler.rs

Abstract:

    Software image handler: copies images and Hamming codes between the SD
    cards, the NOR flash and the FRAM in steps that fit into the task period.

--*/

use crate::countdown::{Clock, Countdown, PeriodCountdown};
use crate::error::HandlerError;
use crate::uplink::UplinkSession;
use boot_image::{
    hamming_code_len, hamming_region, SdCard, SlotId, SlotImageInfo, BOOTLOADER_NAME,
    BOOTLOADER_REPOSITORY, SECOND_STAGE_BOOTLOADER_NAME, SW_REPOSITORY,
};
use log::{debug, error, info, warn};
use obc_bootloader::flash::{FlashPartition, FlashStorage};
use obc_bootloader::fs::{SdCardAccess, WritableFileSystem};
use obc_bootloader::integrity::Crc16Digest;
use obc_config::{BootRecordStoreAsync, HandlerConfig, ObcMemoryMap, RecordError};

/// Largest amount of data moved in one step.
pub const MAX_STEP_SIZE: usize = 4096;
/// Granularity of NOR erases.
pub const NOR_ERASE_STEP: usize = 0x2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Copies the image of an SD card slot into the NOR flash.
    CopySdcImageToFlash { source: SlotId },
    CopyFlashImageToSdc { target: SlotId },
    CopySdcToSdc { source: SlotId, target: SlotId },
    /// Loads the Hamming code file of `slot` from `volume` into FRAM.
    CopyHammingToFram { slot: SlotId, volume: SdCard },
    /// Programs `stage` (one of the bootloader slots) from `volume`.
    CopySdcBootloaderToFlash { volume: SdCard, stage: SlotId },
    SetHammingFlag { slot: SlotId, enabled: bool },
    /// Master switch the bootloader checks before any per-slot flag.
    SetGlobalHammingFlag { enabled: bool },
    /// The image in `slot` booted successfully.
    ConfirmBoot { slot: SlotId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Idle,
    /// The period budget ran out; the operation resumes next period.
    TaskPeriodOverSoon,
    Finished(Command),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endpoint {
    File {
        slot: SlotId,
        volume: SdCard,
        directory: &'static str,
        name: &'static str,
    },
    Nor(SlotId),
    HammingCode(SlotId),
}

impl Endpoint {
    pub(crate) fn slot(&self) -> SlotId {
        match *self {
            Endpoint::File { slot, .. } | Endpoint::Nor(slot) | Endpoint::HammingCode(slot) => slot,
        }
    }
}

impl core::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Endpoint::File {
                volume,
                directory,
                name,
                ..
            } => write!(f, "{:?}:{}/{}", volume, directory, name),
            Endpoint::Nor(slot) => write!(f, "NOR {}", slot),
            Endpoint::HammingCode(slot) => write!(f, "FRAM code of {}", slot),
        }
    }
}

pub(crate) fn sd_image(slot: SlotId) -> Result<Endpoint, HandlerError> {
    match (slot.sd_card(), slot.image_file_name()) {
        (Some(volume), Some(name)) => Ok(Endpoint::File {
            slot,
            volume,
            directory: SW_REPOSITORY,
            name,
        }),
        _ => Err(HandlerError::InvalidSlot(slot)),
    }
}

/// Source and target of a copy command, `None` for commands that complete
/// immediately.
fn transfer(command: Command) -> Result<Option<(Endpoint, Endpoint)>, HandlerError> {
    let endpoints = match command {
        Command::CopySdcImageToFlash { source } => {
            (sd_image(source)?, Endpoint::Nor(SlotId::NorFlash))
        }
        Command::CopyFlashImageToSdc { target } => {
            (Endpoint::Nor(SlotId::NorFlash), sd_image(target)?)
        }
        Command::CopySdcToSdc { source, target } => {
            if source == target {
                return Err(HandlerError::InvalidSlot(target));
            }
            (sd_image(source)?, sd_image(target)?)
        }
        Command::CopyHammingToFram { slot, volume } => {
            let directory = if slot.is_bootloader() {
                BOOTLOADER_REPOSITORY
            } else {
                SW_REPOSITORY
            };
            let file = Endpoint::File {
                slot,
                volume,
                directory,
                name: slot.hamming_file_name(),
            };
            (file, Endpoint::HammingCode(slot))
        }
        Command::CopySdcBootloaderToFlash { volume, stage } => {
            let name = match stage {
                SlotId::BootloaderPrimary => BOOTLOADER_NAME,
                SlotId::BootloaderSecondary => SECOND_STAGE_BOOTLOADER_NAME,
                other => return Err(HandlerError::InvalidSlot(other)),
            };
            let file = Endpoint::File {
                slot: stage,
                volume,
                directory: BOOTLOADER_REPOSITORY,
                name,
            };
            (file, Endpoint::Nor(stage))
        }
        Command::SetHammingFlag { .. }
        | Command::SetGlobalHammingFlag { .. }
        | Command::ConfirmBoot { .. } => return Ok(None),
    };
    Ok(Some(endpoints))
}

pub(crate) fn nor_partition<'f>(
    flash: &'f dyn FlashStorage,
    map: &ObcMemoryMap,
    slot: SlotId,
) -> Result<FlashPartition<'f>, HandlerError> {
    let (offset, len) = map
        .nor_partition(slot)
        .ok_or(HandlerError::InvalidSlot(slot))?;
    Ok(FlashPartition::new(
        flash,
        slot.name(),
        offset as usize,
        len as usize,
    )?)
}

pub(crate) fn hamming_capacity(slot: SlotId, fram_size: u32) -> Result<u32, HandlerError> {
    hamming_region(slot, fram_size)
        .map(|region| region.capacity)
        .map_err(|_| HandlerError::Record(RecordError::OutOfRange))
}

/// Writes image bytes into a file or NOR target. A file written from offset
/// zero is created anew.
pub(crate) fn write_image<F: WritableFileSystem>(
    fs: &mut F,
    flash: &dyn FlashStorage,
    map: &ObcMemoryMap,
    target: Endpoint,
    offset: u32,
    data: &[u8],
) -> Result<(), HandlerError> {
    match target {
        Endpoint::File {
            volume,
            directory,
            name,
            ..
        } => {
            let mut access = SdCardAccess::open(fs, volume)?;
            access.change_directory(directory)?;
            if offset == 0 {
                access.create_file(name)?;
            } else {
                access.open_file(name)?;
                access.seek(offset)?;
            }
            access.write_all(data)?;
        }
        Endpoint::Nor(slot) => nor_partition(flash, map, slot)?.write(offset as usize, data)?,
        Endpoint::HammingCode(slot) => return Err(HandlerError::InvalidSlot(slot)),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Prepare,
    Erase,
    Copy,
}

struct Operation {
    command: Command,
    source: Endpoint,
    target: Endpoint,
    phase: Phase,
    offset: u32,
    total: u32,
    read_errors: u8,
    crc: Crc16Digest,
}

impl Operation {
    fn new(command: Command, source: Endpoint, target: Endpoint) -> Self {
        Operation {
            command,
            source,
            target,
            phase: Phase::Prepare,
            offset: 0,
            total: 0,
            read_errors: 0,
            crc: Crc16Digest::new(),
        }
    }
}

/// Periodic task object managing the boot images from the flight software.
///
/// Copy commands start an operation which `perform_operation` advances once
/// per task period. Only one operation or upload runs at a time. Completed
/// transfers are recorded in the boot record through the shared store.
pub struct SoftwareImageHandler<'a, F: WritableFileSystem, S: BootRecordStoreAsync> {
    pub(crate) fs: F,
    pub(crate) flash: &'a dyn FlashStorage,
    pub(crate) store: &'a S,
    pub(crate) map: ObcMemoryMap,
    config: HandlerConfig,
    step_size: usize,
    buffer: [u8; MAX_STEP_SIZE],
    operation: Option<Operation>,
    pub(crate) uplink: Option<UplinkSession>,
}

impl<'a, F: WritableFileSystem, S: BootRecordStoreAsync> SoftwareImageHandler<'a, F, S> {
    pub fn new(
        fs: F,
        flash: &'a dyn FlashStorage,
        store: &'a S,
        map: ObcMemoryMap,
        config: HandlerConfig,
    ) -> Self {
        SoftwareImageHandler {
            fs,
            flash,
            store,
            map,
            step_size: config.step_size.clamp(1, MAX_STEP_SIZE),
            config,
            buffer: [0; MAX_STEP_SIZE],
            operation: None,
            uplink: None,
        }
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    pub fn filesystem_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    pub fn is_busy(&self) -> bool {
        self.operation.is_some() || self.uplink.is_some()
    }

    pub fn active_command(&self) -> Option<Command> {
        self.operation.as_ref().map(|operation| operation.command)
    }

    /// Starts a copy command or executes an immediate one.
    pub async fn execute_command(&mut self, command: Command) -> Result<(), HandlerError> {
        let (source, target) = match transfer(command)? {
            Some(endpoints) => endpoints,
            None => return self.execute_immediate(command).await,
        };
        if self.is_busy() {
            warn!(
                "{:?} rejected, {:?} in progress",
                command,
                self.active_command()
            );
            return Err(HandlerError::Busy);
        }
        info!("Starting {:?}: {} -> {}", command, source, target);
        self.operation = Some(Operation::new(command, source, target));
        Ok(())
    }

    async fn execute_immediate(&mut self, command: Command) -> Result<(), HandlerError> {
        match command {
            Command::SetHammingFlag { slot, enabled } => {
                self.store.set_hamming_flag(slot, enabled).await?;
                info!("Hamming decoding of {} enabled: {}", slot, enabled);
            }
            Command::SetGlobalHammingFlag { enabled } => {
                self.store.set_global_hamming_flag(enabled).await?;
                info!("Hamming decoding enabled: {}", enabled);
            }
            Command::ConfirmBoot { slot } => {
                self.store.reset_reboot_counter(slot).await?;
                if self.store.read_record().await?.pending_update == Some(slot) {
                    self.store.set_pending_update(None).await?;
                }
                info!("Boot of {} confirmed", slot);
            }
            _ => {}
        }
        Ok(())
    }

    /// Advances the active operation with the period budget of `clock`.
    pub async fn run_period<C: Clock + ?Sized>(
        &mut self,
        clock: &C,
    ) -> Result<OperationStatus, HandlerError> {
        let countdown = PeriodCountdown::start(clock, self.config.period_budget_ms());
        self.perform_operation(&countdown).await
    }

    /// Advances the active operation until it finishes or `countdown`
    /// expires. A failed operation is dropped and its error returned.
    pub async fn perform_operation(
        &mut self,
        countdown: &dyn Countdown,
    ) -> Result<OperationStatus, HandlerError> {
        let Some(mut operation) = self.operation.take() else {
            return Ok(OperationStatus::Idle);
        };
        let result = match self.advance(&mut operation, countdown).await {
            Ok(true) => self.finish(&operation).await.map(|_| true),
            other => other,
        };
        match result {
            Ok(true) => {
                info!(
                    "{:?} finished, {} bytes, crc {:#06x}",
                    operation.command,
                    operation.total,
                    operation.crc.value()
                );
                Ok(OperationStatus::Finished(operation.command))
            }
            Ok(false) => {
                self.operation = Some(operation);
                Ok(OperationStatus::TaskPeriodOverSoon)
            }
            Err(err) => {
                error!("{:?} aborted: {}", operation.command, err);
                Err(err)
            }
        }
    }

    /// Returns `true` once all data was copied.
    async fn advance(
        &mut self,
        operation: &mut Operation,
        countdown: &dyn Countdown,
    ) -> Result<bool, HandlerError> {
        loop {
            match operation.phase {
                Phase::Prepare => self.prepare(operation).await?,
                Phase::Erase => self.erase_step(operation)?,
                Phase::Copy => {
                    if !self.copy_step(operation).await? {
                        return Ok(false);
                    }
                    if operation.offset >= operation.total {
                        return Ok(true);
                    }
                }
            }
            if countdown.has_timed_out() {
                debug!(
                    "{:?} yields at {:#x} of {:#x}",
                    operation.command, operation.offset, operation.total
                );
                return Ok(false);
            }
        }
    }

    async fn prepare(&mut self, operation: &mut Operation) -> Result<(), HandlerError> {
        let total = self.source_length(operation.source).await?;
        if total == 0 {
            return Err(HandlerError::EmptySource);
        }
        let capacity = self.capacity(operation.target)?;
        if total > capacity {
            return Err(HandlerError::TooLarge {
                size: total,
                capacity,
            });
        }
        self.invalidate(operation.target).await?;
        operation.total = total;
        operation.phase = match operation.target {
            Endpoint::Nor(_) => Phase::Erase,
            _ => Phase::Copy,
        };
        debug!("{} holds {} bytes", operation.source, total);
        Ok(())
    }

    async fn source_length(&mut self, source: Endpoint) -> Result<u32, HandlerError> {
        match source {
            Endpoint::File {
                volume,
                directory,
                name,
                ..
            } => {
                let mut access = SdCardAccess::open(&mut self.fs, volume)?;
                access.change_directory(directory)?;
                access.open_file(name)?;
                Ok(access.file_length()?)
            }
            Endpoint::Nor(slot) => Ok(self.store.read_record().await?.slot(slot).binary_size),
            Endpoint::HammingCode(slot) => Err(HandlerError::InvalidSlot(slot)),
        }
    }

    /// Drops the record of what `target` is about to lose, so an interrupted
    /// transfer never leaves a record describing a partly written slot.
    pub(crate) async fn invalidate(&self, target: Endpoint) -> Result<(), HandlerError> {
        let slot = target.slot();
        match target {
            Endpoint::HammingCode(_) => self.store.set_hamming_flag(slot, false).await?,
            _ => {
                let empty = SlotImageInfo {
                    binary_size: 0,
                    hamming_code_size: 0,
                    hamming_enabled: false,
                    image_crc: None,
                };
                self.store.write_slot_image_info(slot, &empty).await?;
            }
        }
        debug!("Record of {} invalidated", target);
        Ok(())
    }

    pub(crate) fn capacity(&self, target: Endpoint) -> Result<u32, HandlerError> {
        match target {
            Endpoint::File { .. } => Ok(u32::MAX),
            Endpoint::Nor(slot) => Ok(nor_partition(self.flash, &self.map, slot)?.len() as u32),
            Endpoint::HammingCode(slot) => hamming_capacity(slot, self.map.fram_size),
        }
    }

    fn erase_step(&mut self, operation: &mut Operation) -> Result<(), HandlerError> {
        let Endpoint::Nor(slot) = operation.target else {
            operation.phase = Phase::Copy;
            return Ok(());
        };
        let partition = nor_partition(self.flash, &self.map, slot)?;
        let end = (operation.total as usize)
            .next_multiple_of(NOR_ERASE_STEP)
            .min(partition.len());
        let len = NOR_ERASE_STEP.min(end - operation.offset as usize);
        partition.erase(operation.offset as usize, len)?;
        operation.offset += len as u32;
        if operation.offset as usize >= end {
            operation.offset = 0;
            operation.phase = Phase::Copy;
        }
        Ok(())
    }

    /// Moves one step. Returns `false` when a failed read is to be retried in
    /// the next period.
    async fn copy_step(&mut self, operation: &mut Operation) -> Result<bool, HandlerError> {
        let len = (operation.total - operation.offset).min(self.step_size as u32) as usize;
        if let Err(err) = self.read_source(operation.source, operation.offset, len) {
            operation.read_errors += 1;
            warn!(
                "Reading {} at {:#x} failed ({}/{}): {}",
                operation.source,
                operation.offset,
                operation.read_errors,
                self.config.max_read_errors,
                err
            );
            if operation.read_errors >= self.config.max_read_errors {
                return Err(HandlerError::TooManyReadErrors);
            }
            return Ok(false);
        }

        let data = &self.buffer[..len];
        match operation.target {
            Endpoint::HammingCode(slot) => {
                self.store
                    .write_hamming_code(slot, operation.offset, data)
                    .await?
            }
            target => write_image(
                &mut self.fs,
                self.flash,
                &self.map,
                target,
                operation.offset,
                data,
            )?,
        }
        operation.crc.update(data);
        operation.offset += len as u32;
        Ok(true)
    }

    fn read_source(&mut self, source: Endpoint, offset: u32, len: usize) -> Result<(), HandlerError> {
        let buf = &mut self.buffer[..len];
        match source {
            Endpoint::File {
                volume,
                directory,
                name,
                ..
            } => {
                let mut access = SdCardAccess::open(&mut self.fs, volume)?;
                access.change_directory(directory)?;
                access.open_file(name)?;
                access.seek(offset)?;
                let mut filled = 0;
                while filled < len {
                    match access.read(&mut buf[filled..])? {
                        0 => return Err(HandlerError::ShortRead),
                        n => filled += n,
                    }
                }
            }
            Endpoint::Nor(slot) => {
                nor_partition(self.flash, &self.map, slot)?.read(offset as usize, buf)?
            }
            Endpoint::HammingCode(slot) => return Err(HandlerError::InvalidSlot(slot)),
        }
        Ok(())
    }

    /// Records the transferred data in the boot record.
    async fn finish(&mut self, operation: &Operation) -> Result<(), HandlerError> {
        match operation.target {
            Endpoint::HammingCode(slot) => {
                let info = *self.store.read_record().await?.slot(slot);
                let fits = info.binary_size != 0
                    && hamming_code_len(info.binary_size as usize) == operation.total as usize;
                if !fits {
                    warn!(
                        "{} byte Hamming code does not match the {} byte image of {}, decoding stays disabled",
                        operation.total, info.binary_size, slot
                    );
                }
                let code = SlotImageInfo {
                    binary_size: info.binary_size,
                    hamming_code_size: operation.total,
                    hamming_enabled: fits,
                    image_crc: info.image_crc,
                };
                self.store.write_slot_image_info(slot, &code).await?;
            }
            target => {
                let slot = target.slot();
                let image = SlotImageInfo {
                    binary_size: operation.total,
                    hamming_code_size: 0,
                    hamming_enabled: false,
                    image_crc: Some(operation.crc.value()),
                };
                self.store.write_slot_image_info(slot, &image).await?;
                self.store.reset_reboot_counter(slot).await?;
            }
        }
        Ok(())
    }
}
