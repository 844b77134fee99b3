/*++

Licensed under the Apache-2.0 license.

File Name:

    selector.rs

Abstract:

    Boot candidate selection and recovery state machine.

--*/

use crate::boot_status::{BootReport, BootStatus, StatusReporter};
use crate::copy::{CopyError, CopyResult, ExecutionMemory, ImageCopyEngine};
use crate::handoff::ValidatedImage;
use crate::source::{ImageLease, ImageSource, SourceError};
use crate::{fatal_error, Watchdog, FATAL_SELECTOR_TRANSITION};
use boot_image::{hamming_code_len, BootRecord, SdCard, SlotId, SLOT_COUNT};
use heapless::Vec;
use log::{error, info, warn};
use obc_config::{BootConfig, BootRecordStore, RecordError};
use smlang::statemachine;

statemachine! {
    derive_states: [Clone, Copy, Debug],
    derive_events: [Clone, Debug],
    transitions: {
        // syntax: CurrentState Event [guard] / action = NextState

        // the record is read once, before any candidate is looked at
        *Start + Begin(RecordSnapshot) / load_record = SelectCandidate,

        SelectCandidate + NextCandidate [has_candidate] / take_candidate = VerifySource,
        SelectCandidate + NextCandidate [!has_candidate] / on_exhausted = Halt,

        // unavailable candidates are skipped without touching their counter
        VerifySource + SourceReady = CopyImage,
        VerifySource + SourceUnavailable(SkipReason) / on_skip = SelectCandidate,

        CopyImage + CopyDone = Validate,
        CopyImage + CopyFailed(CopyError) / on_attempt_failed = SelectCandidate,

        Validate + ImageValid / on_image_valid = Success,
        Validate + ImageInvalid(CopyError) / on_attempt_failed = SelectCandidate,
    }
}

/// The boot record as read at the start of the boot.
#[derive(Debug, Clone, Copy)]
pub struct RecordSnapshot {
    pub record: BootRecord,
    /// False when the record could not be read; counters are then left alone.
    pub usable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Source(SourceError),
    EmptyImage,
    TooLarge { size: u32, capacity: u32 },
}

/// State machine extended variables.
pub struct BootContext {
    config: BootConfig,
    record: BootRecord,
    record_usable: bool,
    candidates: Vec<SlotId, SLOT_COUNT>,
    cursor: usize,
    current: Option<SlotId>,
    failed_attempts: u8,
    status: BootStatus,
}

impl BootContext {
    fn new(config: BootConfig) -> Self {
        BootContext {
            config,
            record: BootRecord::blank(),
            record_usable: false,
            candidates: Vec::new(),
            cursor: 0,
            current: None,
            failed_attempts: 0,
            status: BootStatus::Ok,
        }
    }

    pub fn candidates(&self) -> &[SlotId] {
        &self.candidates
    }

    pub fn current(&self) -> Option<SlotId> {
        self.current
    }

    fn raise_status(&mut self, status: BootStatus) {
        self.status = self.status.max(status);
    }

    fn record_copy(&mut self, result: &CopyResult) {
        if result.hamming.corrected_blocks > 0 {
            self.raise_status(BootStatus::HammingSingleBitCorrected);
        }
        if result.hamming.ecc_corrupted_blocks > 0 {
            self.raise_status(BootStatus::HammingEccCorrupted);
        }
    }
}

impl StateMachineContext for BootContext {
    fn has_candidate(&self) -> Result<bool, ()> {
        Ok(self.cursor < self.candidates.len())
    }

    fn load_record(&mut self, snapshot: RecordSnapshot) -> Result<(), ()> {
        self.record = snapshot.record;
        self.record_usable = snapshot.usable;
        if !snapshot.usable {
            self.raise_status(BootStatus::FramIssues);
        }
        self.candidates = candidate_order(&self.config, &self.record);
        info!(
            "{:?} boot candidates: {:?}",
            self.config.stage,
            self.candidates.as_slice()
        );
        Ok(())
    }

    fn take_candidate(&mut self) -> Result<(), ()> {
        let slot = *self.candidates.get(self.cursor).ok_or(())?;
        self.cursor += 1;
        self.current = Some(slot);
        info!("Trying {}", slot);
        Ok(())
    }

    fn on_exhausted(&mut self) -> Result<(), ()> {
        self.current = None;
        error!("All boot candidates exhausted");
        Ok(())
    }

    fn on_skip(&mut self, reason: SkipReason) -> Result<(), ()> {
        if let Some(slot) = self.current {
            warn!("Skipping {}: {:?}", slot, reason);
        }
        Ok(())
    }

    fn on_attempt_failed(&mut self, err: CopyError) -> Result<(), ()> {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        if matches!(err, CopyError::Uncorrectable { .. }) {
            self.raise_status(BootStatus::HammingMultiBit);
        }
        if let Some(slot) = self.current {
            error!("Boot from {} failed: {}", slot, err);
        }
        Ok(())
    }

    fn on_image_valid(&mut self) -> Result<(), ()> {
        if let Some(slot) = self.current {
            info!("Image in {} validated", slot);
        }
        Ok(())
    }
}

/// Orders the configured candidates: the preferred SD card's slots before the
/// other card's, a pending software update first, slots past the demotion
/// threshold last. Otherwise the configured order is kept.
pub fn candidate_order(config: &BootConfig, record: &BootRecord) -> Vec<SlotId, SLOT_COUNT> {
    let mut order: Vec<SlotId, SLOT_COUNT> = Vec::new();
    for slot in config.candidate_order.iter().take(SLOT_COUNT) {
        if !config.stage.loads(*slot) {
            warn!("{} is not started by the {:?} stage, ignored", slot, config.stage);
            continue;
        }
        if !order.contains(slot) {
            let _ = order.push(*slot);
        }
    }

    if config.honor_preferred_sd_card && record.formatted {
        prefer_sd_card(&mut order, record.preferred_sd_card);
    }

    if config.honor_pending_update {
        if let Some(pending) = record.pending_update {
            if let Some(position) = order.iter().position(|slot| *slot == pending) {
                let slot = order.remove(position);
                let _ = order.insert(0, slot);
            }
        }
    }

    if let Some(threshold) = config.demote_threshold {
        let demoted = |slot: &SlotId| record.slot(*slot).reboot_counter > threshold;
        let mut reordered: Vec<SlotId, SLOT_COUNT> = Vec::new();
        for slot in order.iter().filter(|slot| !demoted(*slot)) {
            let _ = reordered.push(*slot);
        }
        for slot in order.iter().filter(|slot| demoted(*slot)) {
            let _ = reordered.push(*slot);
        }
        order = reordered;
    }
    order
}

/// Reorders the SD card slots among the positions they already occupy.
fn prefer_sd_card(order: &mut Vec<SlotId, SLOT_COUNT>, preferred: SdCard) {
    let mut sd_slots: Vec<SlotId, SLOT_COUNT> = Vec::new();
    for card in [preferred, preferred.other()] {
        for slot in order.iter().filter(|slot| slot.sd_card() == Some(card)) {
            let _ = sd_slots.push(*slot);
        }
    }
    let mut sd_slots = sd_slots.into_iter();
    for slot in order.iter_mut().filter(|slot| slot.is_sd_card()) {
        if let Some(next) = sd_slots.next() {
            *slot = next;
        }
    }
}

/// Everything the selector touches during a boot.
pub struct BootResources<'a> {
    pub store: &'a mut dyn BootRecordStore,
    pub sources: &'a mut [&'a mut dyn ImageSource],
    pub memory: &'a mut dyn ExecutionMemory,
    pub watchdog: &'a mut dyn Watchdog,
    pub reporter: Option<&'a mut dyn StatusReporter>,
}

#[derive(Debug)]
pub enum BootOutcome {
    Ready(ValidatedImage),
    Exhausted,
}

fn fire(machine: &mut StateMachine<BootContext>, event: Events) {
    let from = *machine.state();
    if machine.process_event(event).is_err() {
        error!("Illegal boot selector transition from {:?}", from);
        fatal_error(FATAL_SELECTOR_TRANSITION);
    }
}

/// Walks the boot candidates until one is copied into execution memory and
/// validated.
pub struct BootSelector<'a> {
    resources: BootResources<'a>,
    engine: ImageCopyEngine,
    machine: StateMachine<BootContext>,
}

impl<'a> BootSelector<'a> {
    pub fn new(config: BootConfig, mut resources: BootResources<'a>) -> Self {
        resources.store.set_counter_limit(config.counter_limit);
        BootSelector {
            resources,
            engine: ImageCopyEngine::new(&config),
            machine: StateMachine::new(BootContext::new(config)),
        }
    }

    pub fn state(&self) -> States {
        *self.machine.state()
    }

    pub fn context(&self) -> &BootContext {
        self.machine.context()
    }

    pub fn report(&self) -> BootReport {
        let context = self.machine.context();
        BootReport {
            status: context.status,
            booted_slot: match self.state() {
                States::Success => context.current,
                _ => None,
            },
            failed_attempts: context.failed_attempts,
        }
    }

    /// Runs one boot. Must only be called once per selector.
    pub fn run(&mut self) -> BootOutcome {
        let snapshot = self.read_record();
        fire(&mut self.machine, Events::Begin(snapshot));

        let outcome = loop {
            match *self.machine.state() {
                States::SelectCandidate => fire(&mut self.machine, Events::NextCandidate),
                States::VerifySource => {
                    let slot = match self.machine.context().current {
                        Some(slot) => slot,
                        None => fatal_error(FATAL_SELECTOR_TRANSITION),
                    };
                    if let Some(image) = self.attempt(slot) {
                        break BootOutcome::Ready(image);
                    }
                }
                States::Halt => break BootOutcome::Exhausted,
                _ => fatal_error(FATAL_SELECTOR_TRANSITION),
            }
        };

        let report = self.report();
        info!(
            "Boot status {:?}, {} failed attempts",
            report.status, report.failed_attempts
        );
        if let Some(reporter) = self.resources.reporter.as_deref_mut() {
            reporter.publish(&report);
        }
        outcome
    }

    fn read_record(&mut self) -> RecordSnapshot {
        let store = &mut *self.resources.store;
        match store.read_record().or_else(|err| {
            warn!("Reading the boot record failed ({}), retrying", err);
            store.read_record()
        }) {
            Ok(record) => {
                if !record.formatted {
                    warn!("No boot record found");
                }
                RecordSnapshot {
                    record,
                    usable: true,
                }
            }
            Err(err) => {
                error!("Boot record unreadable ({}), using defaults", err);
                RecordSnapshot {
                    record: BootRecord::blank(),
                    usable: false,
                }
            }
        }
    }

    /// Drives one candidate from VerifySource to either Success or back to
    /// SelectCandidate. The source stays leased for the whole attempt.
    fn attempt(&mut self, slot: SlotId) -> Option<ValidatedImage> {
        let config = self.machine.context().config;
        let record = self.machine.context().record;
        let record_usable = self.machine.context().record_usable;

        let source = match self
            .resources
            .sources
            .iter_mut()
            .find(|source| source.serves(slot))
        {
            Some(source) => source,
            None => {
                let reason = SkipReason::Source(SourceError::Unavailable);
                fire(&mut self.machine, Events::SourceUnavailable(reason));
                return None;
            }
        };

        self.resources.watchdog.kick();
        let located = ImageLease::acquire(&mut **source, slot, &record);
        self.resources.watchdog.kick();
        let mut lease = match located {
            Ok(lease) => lease,
            Err(err) => {
                fire(
                    &mut self.machine,
                    Events::SourceUnavailable(SkipReason::Source(err)),
                );
                return None;
            }
        };

        let descriptor = *lease.descriptor();
        let capacity = self.resources.memory.capacity();
        if descriptor.size == 0 {
            fire(
                &mut self.machine,
                Events::SourceUnavailable(SkipReason::EmptyImage),
            );
            return None;
        }
        if descriptor.size > capacity {
            let reason = SkipReason::TooLarge {
                size: descriptor.size,
                capacity,
            };
            fire(&mut self.machine, Events::SourceUnavailable(reason));
            return None;
        }
        fire(&mut self.machine, Events::SourceReady);

        if record_usable {
            if let Err(status) = increment_counter(&mut *self.resources.store, slot) {
                self.machine.context_mut().raise_status(status);
            }
        }

        let mut use_codes = config.hamming_enabled && descriptor.hamming_offset.is_some();
        if use_codes && !record.global_hamming {
            info!("Hamming decoding disabled in the boot record, ignoring the code of {}", slot);
            use_codes = false;
        }
        let expected_code_size = hamming_code_len(descriptor.size as usize) as u32;
        let recorded_code_size = record.slot(slot).hamming_code_size;
        if use_codes && recorded_code_size != expected_code_size {
            warn!(
                "Hamming code of {} has {} bytes, expected {}; not decoding",
                slot, recorded_code_size, expected_code_size
            );
            use_codes = false;
        }
        let codes: Option<&mut dyn BootRecordStore> = if use_codes {
            Some(&mut *self.resources.store)
        } else {
            None
        };

        let result = self.engine.copy(
            &mut lease,
            codes,
            &mut *self.resources.memory,
            &mut *self.resources.watchdog,
        );
        self.machine.context_mut().record_copy(&result);

        match result.error {
            Some(err @ (CopyError::CrcMismatch { .. } | CopyError::ExpectedCrcMismatch { .. })) => {
                fire(&mut self.machine, Events::CopyDone);
                fire(&mut self.machine, Events::ImageInvalid(err));
                None
            }
            Some(err) => {
                fire(&mut self.machine, Events::CopyFailed(err));
                None
            }
            None => {
                fire(&mut self.machine, Events::CopyDone);
                fire(&mut self.machine, Events::ImageValid);
                Some(ValidatedImage::new(
                    slot,
                    self.resources.memory.base_address(),
                    result.bytes_copied,
                    result.crc,
                ))
            }
        }
    }
}

/// Counts a boot attempt before the copy starts. A failing FRAM does not stop
/// the attempt, it is only reported.
fn increment_counter(store: &mut dyn BootRecordStore, slot: SlotId) -> Result<(), BootStatus> {
    let result = store.increment_reboot_counter(slot).or_else(|err| {
        if err.is_transfer_failure() {
            warn!("Incrementing the counter of {} failed ({}), retrying", slot, err);
            store.increment_reboot_counter(slot)
        } else {
            Err(err)
        }
    });
    match result {
        Ok(counter) => {
            info!("Reboot counter of {} is {}", slot, counter);
            Ok(())
        }
        Err(RecordError::SentinelOverflow(counter)) => {
            warn!("Reboot counter of {} wrapped to {}", slot, counter);
            Ok(())
        }
        Err(err) => {
            error!("Reboot counter of {} not updated: {}", slot, err);
            Err(BootStatus::FramIssues)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obc_config::BootStage;

    fn formatted_record() -> BootRecord {
        let mut record = BootRecord::blank();
        record.formatted = true;
        record
    }

    #[test]
    fn test_default_order() {
        let config = BootConfig::default();
        let order = candidate_order(&config, &formatted_record());
        assert_eq!(order.as_slice(), config.candidate_order);
    }

    #[test]
    fn test_first_stage_order() {
        let config = BootConfig::for_stage(BootStage::FirstStage);
        let order = candidate_order(&config, &BootRecord::blank());
        assert_eq!(order.as_slice(), &[SlotId::BootloaderSecondary]);
    }

    #[test]
    fn test_candidates_of_other_stage_dropped() {
        const ORDER: [SlotId; 3] = [
            SlotId::BootloaderPrimary,
            SlotId::NorFlash,
            SlotId::BootloaderSecondary,
        ];
        let config = BootConfig {
            candidate_order: &ORDER,
            ..BootConfig::default()
        };
        let order = candidate_order(&config, &formatted_record());
        assert_eq!(order.as_slice(), &[SlotId::NorFlash]);

        let config = BootConfig {
            stage: BootStage::FirstStage,
            ..config
        };
        let order = candidate_order(&config, &formatted_record());
        assert_eq!(
            order.as_slice(),
            &[SlotId::BootloaderPrimary, SlotId::BootloaderSecondary]
        );
    }

    #[test]
    fn test_preferred_sd_card() {
        let config = BootConfig::default();
        let mut record = formatted_record();
        record.preferred_sd_card = SdCard::Sd1;
        let order = candidate_order(&config, &record);
        assert_eq!(
            order.as_slice(),
            &[
                SlotId::NorFlash,
                SlotId::Sdc1Slot0,
                SlotId::Sdc1Slot1,
                SlotId::Sdc0Slot0,
                SlotId::Sdc0Slot1,
            ]
        );
    }

    #[test]
    fn test_preferred_sd_card_needs_formatted_record() {
        let config = BootConfig::default();
        let mut record = BootRecord::blank();
        record.preferred_sd_card = SdCard::Sd1;
        let order = candidate_order(&config, &record);
        assert_eq!(order.as_slice(), config.candidate_order);
    }

    #[test]
    fn test_pending_update_first() {
        let config = BootConfig::default();
        let mut record = formatted_record();
        record.pending_update = Some(SlotId::Sdc0Slot1);
        let order = candidate_order(&config, &record);
        assert_eq!(order[0], SlotId::Sdc0Slot1);
        assert_eq!(order[1], SlotId::NorFlash);
        assert_eq!(order.len(), config.candidate_order.len());

        let config = BootConfig {
            honor_pending_update: false,
            ..config
        };
        assert_eq!(
            candidate_order(&config, &record).as_slice(),
            config.candidate_order
        );
    }

    #[test]
    fn test_pending_update_outside_stage_ignored() {
        let config = BootConfig::for_stage(BootStage::FirstStage);
        let mut record = formatted_record();
        record.pending_update = Some(SlotId::NorFlash);
        let order = candidate_order(&config, &record);
        assert_eq!(order.as_slice(), &[SlotId::BootloaderSecondary]);
    }

    #[test]
    fn test_demotion() {
        let mut record = formatted_record();
        record.slot_mut(SlotId::NorFlash).reboot_counter = 9;
        record.slot_mut(SlotId::Sdc0Slot1).reboot_counter = 4;

        let config = BootConfig::default();
        assert_eq!(
            candidate_order(&config, &record).as_slice(),
            config.candidate_order
        );

        let config = BootConfig {
            demote_threshold: Some(3),
            ..config
        };
        assert_eq!(
            candidate_order(&config, &record).as_slice(),
            &[
                SlotId::Sdc0Slot0,
                SlotId::Sdc1Slot0,
                SlotId::Sdc1Slot1,
                SlotId::NorFlash,
                SlotId::Sdc0Slot1,
            ]
        );
    }

    #[test]
    fn test_transitions() {
        let mut machine = StateMachine::new(BootContext::new(BootConfig::default()));
        let snapshot = RecordSnapshot {
            record: formatted_record(),
            usable: true,
        };
        assert!(machine.process_event(Events::Begin(snapshot)).is_ok());
        assert!(machine.process_event(Events::NextCandidate).is_ok());
        assert!(matches!(machine.state(), States::VerifySource));
        assert_eq!(machine.context().current(), Some(SlotId::NorFlash));

        // Validation cannot be reached without a copy.
        assert!(machine.process_event(Events::ImageValid).is_err());

        assert!(machine.process_event(Events::SourceReady).is_ok());
        let err = CopyError::Uncorrectable { block: 3 };
        assert!(machine.process_event(Events::CopyFailed(err)).is_ok());
        assert!(matches!(machine.state(), States::SelectCandidate));
        assert_eq!(machine.context().failed_attempts, 1);
        assert_eq!(machine.context().status, BootStatus::HammingMultiBit);
    }

    #[test]
    fn test_exhaustion() {
        let config = BootConfig::for_stage(BootStage::FirstStage);
        let mut machine = StateMachine::new(BootContext::new(config));
        let snapshot = RecordSnapshot {
            record: BootRecord::blank(),
            usable: false,
        };
        assert!(machine.process_event(Events::Begin(snapshot)).is_ok());
        assert_eq!(machine.context().status, BootStatus::FramIssues);
        assert!(machine.process_event(Events::NextCandidate).is_ok());
        let reason = SkipReason::Source(SourceError::Unavailable);
        assert!(machine
            .process_event(Events::SourceUnavailable(reason))
            .is_ok());
        assert!(machine.process_event(Events::NextCandidate).is_ok());
        assert!(matches!(machine.state(), States::Halt));
        assert_eq!(machine.context().current(), None);
    }
}
