// Licensed under the Apache-2.0 license

//! Boot image sources: locating a slot's image and streaming it out.

mod flash;
mod sdcard;

pub use flash::FlashSource;
pub use sdcard::SdCardSource;

use crate::flash::FlashDrvError;
use crate::fs::FsError;
use boot_image::{BootRecord, SdCard, SlotId, SlotInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMedium {
    NorFlash,
    SdCard(SdCard),
}

/// A located image, valid for one boot attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub slot: SlotId,
    pub medium: SourceMedium,
    /// Address of the image on its medium, zero for files.
    pub base_address: u32,
    pub size: u32,
    /// Offset of the image's code within the slot's Hamming code region.
    pub hamming_offset: Option<u32>,
    /// CRC recorded when the slot was written.
    pub expected_crc: Option<u16>,
}

impl ImageDescriptor {
    pub(crate) fn new(
        slot: SlotId,
        medium: SourceMedium,
        base_address: u32,
        size: u32,
        info: &SlotInfo,
    ) -> Self {
        ImageDescriptor {
            slot,
            medium,
            base_address,
            size,
            hamming_offset: info.hamming_enabled.then_some(0),
            expected_crc: info.image_crc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceError {
    /// The slot holds no image or is not served by this source.
    Unavailable,
    Filesystem(FsError),
    Flash(FlashDrvError),
    /// Read past the end of the located image.
    OutOfRange,
    /// The descriptor does not belong to the open image.
    NotLocated,
}

impl SourceError {
    /// Failures worth repeating the same read for.
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            SourceError::Flash(_) | SourceError::Filesystem(FsError::Read | FsError::Seek)
        )
    }
}

impl From<FsError> for SourceError {
    fn from(err: FsError) -> Self {
        SourceError::Filesystem(err)
    }
}

impl From<FlashDrvError> for SourceError {
    fn from(err: FlashDrvError) -> Self {
        SourceError::Flash(err)
    }
}

impl core::fmt::Display for SourceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SourceError::Unavailable => write!(f, "no image"),
            SourceError::Filesystem(err) => write!(f, "file system: {}", err),
            SourceError::Flash(err) => write!(f, "{}", err),
            SourceError::OutOfRange => write!(f, "read out of range"),
            SourceError::NotLocated => write!(f, "image not located"),
        }
    }
}

/// Medium holding one or more boot slots.
pub trait ImageSource {
    fn serves(&self, slot: SlotId) -> bool;

    /// Finds the image of `slot` and prepares it for reading. On failure
    /// nothing stays open.
    fn locate(&mut self, slot: SlotId, record: &BootRecord) -> Result<ImageDescriptor, SourceError>;

    /// Reads image bytes starting at `offset`, returning the number read.
    fn read(
        &mut self,
        descriptor: &ImageDescriptor,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<usize, SourceError>;

    /// Releases everything `locate` acquired.
    fn release(&mut self, descriptor: &ImageDescriptor);
}

/// A located image; the source is released when the lease is dropped.
pub struct ImageLease<'s, S: ImageSource + ?Sized> {
    source: &'s mut S,
    descriptor: ImageDescriptor,
}

impl<'s, S: ImageSource + ?Sized> ImageLease<'s, S> {
    pub fn acquire(
        source: &'s mut S,
        slot: SlotId,
        record: &BootRecord,
    ) -> Result<Self, SourceError> {
        let descriptor = source.locate(slot, record)?;
        Ok(ImageLease { source, descriptor })
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    pub fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, SourceError> {
        self.source.read(&self.descriptor, offset, buf)
    }
}

impl<S: ImageSource + ?Sized> Drop for ImageLease<'_, S> {
    fn drop(&mut self) {
        self.source.release(&self.descriptor);
    }
}

/// Bytes of `buf` that may be read at `offset` without passing `size`.
pub(crate) fn readable_len(size: u32, offset: u32, buf_len: usize) -> Result<usize, SourceError> {
    if offset > size {
        return Err(SourceError::OutOfRange);
    }
    Ok(buf_len.min((size - offset) as usize))
}
