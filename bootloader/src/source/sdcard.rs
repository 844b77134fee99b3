// Licensed under the Apache-2.0 license

use super::{readable_len, ImageDescriptor, ImageSource, SourceError, SourceMedium};
use crate::fs::{FileSystem, SdCardAccess};
use boot_image::{BootRecord, SdCard, SlotId, SW_REPOSITORY};
use log::{debug, warn};

struct Session<T> {
    slot: SlotId,
    volume: SdCard,
    file: T,
}

/// Slots stored as files on the two SD cards.
pub struct SdCardSource<F: FileSystem> {
    fs: F,
    session: Option<Session<F::File>>,
}

impl<F: FileSystem> SdCardSource<F> {
    pub fn new(fs: F) -> Self {
        SdCardSource { fs, session: None }
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    pub fn filesystem_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            self.fs.close(session.file);
            self.fs.close_filesystem(session.volume);
        }
    }
}

impl<F: FileSystem> ImageSource for SdCardSource<F> {
    fn serves(&self, slot: SlotId) -> bool {
        slot.is_sd_card()
    }

    fn locate(&mut self, slot: SlotId, record: &BootRecord) -> Result<ImageDescriptor, SourceError> {
        let (volume, name) = match (slot.sd_card(), slot.image_file_name()) {
            (Some(volume), Some(name)) => (volume, name),
            _ => return Err(SourceError::Unavailable),
        };
        self.close_session();

        let mut access = SdCardAccess::open(&mut self.fs, volume)?;
        access.change_directory(SW_REPOSITORY)?;
        access.open_file(name).inspect_err(|err| {
            warn!("Opening {}/{} on {:?} failed: {}", SW_REPOSITORY, name, volume, err)
        })?;
        let file_length = access.file_length()?;
        let (volume, file) = access.into_open_file().ok_or(SourceError::NotLocated)?;
        self.session = Some(Session { slot, volume, file });

        // The recorded size wins so that a truncated file fails the copy. A
        // formatted record without a size marks a slot that is being written.
        let info = record.slot(slot);
        let size = if record.formatted {
            if info.binary_size != file_length {
                warn!(
                    "{} holds {} bytes, {} recorded",
                    slot, file_length, info.binary_size
                );
            }
            info.binary_size
        } else {
            file_length
        };
        debug!("Located {} ({} bytes)", slot, size);

        Ok(ImageDescriptor::new(
            slot,
            SourceMedium::SdCard(volume),
            0,
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
        let session = match self.session.as_mut() {
            Some(session) if session.slot == descriptor.slot => session,
            _ => return Err(SourceError::NotLocated),
        };
        let len = readable_len(descriptor.size, offset, buf.len())?;
        self.fs.seek(&mut session.file, offset)?;
        Ok(self.fs.read(&mut session.file, &mut buf[..len])?)
    }

    fn release(&mut self, descriptor: &ImageDescriptor) {
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.slot == descriptor.slot)
        {
            self.close_session();
        }
    }
}

impl<F: FileSystem> Drop for SdCardSource<F> {
    fn drop(&mut self) {
        self.close_session();
    }
}
