// Licensed under the Apache-2.0 license

//! Reception of binaries uplinked from ground. A lead packet announces the
//! binary, then numbered data packets carry the image followed by its
//! Hamming code.

use crate::error::{HandlerError, UplinkError};
use crate::handler::{
    hamming_capacity, nor_partition, sd_image, write_image, Endpoint, SoftwareImageHandler,
    NOR_ERASE_STEP,
};
use boot_image::{LeadPacket, SlotId, SlotImageInfo};
use log::{debug, error, info, warn};
use obc_bootloader::fs::WritableFileSystem;
use obc_bootloader::integrity::Crc16Digest;
use obc_config::BootRecordStoreAsync;

pub(crate) struct UplinkSession {
    packet: LeadPacket,
    target: Endpoint,
    next_sequence: u16,
    received: u32,
    crc: Crc16Digest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkProgress {
    Accepted { received: u32 },
    /// The last packet was stored and the slot recorded.
    Complete(SlotId),
}

impl<F: WritableFileSystem, S: BootRecordStoreAsync> SoftwareImageHandler<'_, F, S> {
    /// Starts an upload. The target slot reads as empty until the upload
    /// completes. A pending upload is abandoned.
    pub async fn handle_lead_packet(&mut self, bytes: &[u8]) -> Result<SlotId, UplinkError> {
        if let Some(command) = self.active_command() {
            warn!("Upload rejected, {:?} in progress", command);
            return Err(HandlerError::Busy.into());
        }
        let packet = LeadPacket::parse(bytes)?;
        if let Some(session) = self.uplink.take() {
            warn!(
                "Abandoning upload of {} after {} bytes",
                session.target, session.received
            );
        }

        let slot = packet.target_slot();
        let target = if slot.is_sd_card() {
            sd_image(slot)?
        } else {
            Endpoint::Nor(slot)
        };
        let capacity = self.capacity(target)?;
        if packet.image_size() > capacity {
            return Err(HandlerError::TooLarge {
                size: packet.image_size(),
                capacity,
            }
            .into());
        }
        let code_capacity = hamming_capacity(slot, self.map.fram_size)?;
        if packet.hamming_code_size() > code_capacity {
            return Err(HandlerError::TooLarge {
                size: packet.hamming_code_size(),
                capacity: code_capacity,
            }
            .into());
        }

        self.invalidate(target).await?;
        if let Endpoint::Nor(slot) = target {
            let partition = nor_partition(self.flash, &self.map, slot)?;
            let len = (packet.image_size() as usize)
                .next_multiple_of(NOR_ERASE_STEP)
                .min(partition.len());
            partition.erase(0, len)?;
        }

        info!(
            "Receiving {} bytes for {} in {} packets, {} bytes of Hamming code",
            packet.binary_size,
            slot,
            packet.number_of_packets,
            packet.hamming_code_size()
        );
        self.uplink = Some(UplinkSession {
            packet,
            target,
            next_sequence: 0,
            received: 0,
            crc: Crc16Digest::new(),
        });
        Ok(slot)
    }

    /// Stores the payload of data packet `sequence`. A packet out of sequence
    /// is rejected without ending the upload; any other failure ends it.
    pub async fn handle_data_packet(
        &mut self,
        sequence: u16,
        data: &[u8],
    ) -> Result<UplinkProgress, UplinkError> {
        let Some(mut session) = self.uplink.take() else {
            return Err(UplinkError::NoSession);
        };
        match self.accept(&mut session, sequence, data).await {
            Ok(UplinkProgress::Complete(slot)) => Ok(UplinkProgress::Complete(slot)),
            Ok(progress) => {
                self.uplink = Some(session);
                Ok(progress)
            }
            Err(err @ UplinkError::OutOfSequence { .. }) => {
                warn!("{}", err);
                self.uplink = Some(session);
                Err(err)
            }
            Err(err) => {
                error!("Upload to {} aborted: {}", session.target, err);
                Err(err)
            }
        }
    }

    async fn accept(
        &mut self,
        session: &mut UplinkSession,
        sequence: u16,
        data: &[u8],
    ) -> Result<UplinkProgress, UplinkError> {
        if sequence != session.next_sequence {
            return Err(UplinkError::OutOfSequence {
                expected: session.next_sequence,
                received: sequence,
            });
        }
        let packet = session.packet;
        let received = session
            .received
            .checked_add(data.len() as u32)
            .filter(|end| *end <= packet.binary_size)
            .ok_or(UplinkError::TooMuchData)?;

        let image_len = packet
            .image_size()
            .saturating_sub(session.received)
            .min(data.len() as u32) as usize;
        let (image, code) = data.split_at(image_len);
        if !image.is_empty() {
            write_image(
                &mut self.fs,
                self.flash,
                &self.map,
                session.target,
                session.received,
                image,
            )?;
            session.crc.update(image);
        }
        if !code.is_empty() {
            let code_offset = session.received + image_len as u32 - packet.image_size();
            self.store
                .write_hamming_code(packet.target_slot(), code_offset, code)
                .await?;
        }
        session.received = received;
        session.next_sequence += 1;
        debug!(
            "Packet {} stored, {}/{} bytes",
            sequence, received, packet.binary_size
        );

        if session.next_sequence < packet.number_of_packets {
            return Ok(UplinkProgress::Accepted { received });
        }
        if received != packet.binary_size {
            return Err(UplinkError::SizeMismatch {
                expected: packet.binary_size,
                received,
            });
        }
        self.complete_upload(session).await?;
        Ok(UplinkProgress::Complete(packet.target_slot()))
    }

    async fn complete_upload(&mut self, session: &UplinkSession) -> Result<(), HandlerError> {
        let packet = session.packet;
        let slot = packet.target_slot();
        let info = SlotImageInfo {
            binary_size: packet.image_size(),
            hamming_code_size: packet.hamming_code_size(),
            hamming_enabled: packet.hamming_code_offset.is_some(),
            image_crc: Some(session.crc.value()),
        };
        self.store.write_slot_image_info(slot, &info).await?;
        self.store.reset_reboot_counter(slot).await?;
        if !slot.is_bootloader() {
            self.store.set_pending_update(Some(slot)).await?;
        }
        info!(
            "Upload of {} complete, {} bytes, crc {:#06x}",
            slot,
            packet.image_size(),
            session.crc.value()
        );
        Ok(())
    }
}
