/*++

Licensed under the Apache-2.0 license.

File Name:

    copy.rs

Abstract:

    Chunked copy of a located boot image into execution memory, with Hamming
    correction and CRC validation.

--*/

use crate::integrity::{hamming_verify_256x, Crc16Digest, HammingError, HammingOutcome};
use crate::source::{ImageDescriptor, ImageLease, ImageSource, SourceError};
use crate::Watchdog;
use boot_image::{hamming_code_len, HAMMING_BLOCK_SIZE, HAMMING_CODE_SIZE};
use log::{debug, warn};
use obc_config::{BootConfig, BootRecordStore, ObcMemoryMap, RecordError};

/// Largest chunk moved between two watchdog kicks.
pub const MAX_CHUNK_SIZE: usize = 4096;
const MAX_CHUNK_CODE_SIZE: usize = MAX_CHUNK_SIZE / HAMMING_BLOCK_SIZE * HAMMING_CODE_SIZE;

/// Memory the image is copied into and executed from.
pub trait ExecutionMemory {
    /// Address the image is linked to and entered at.
    fn base_address(&self) -> u32;

    fn capacity(&self) -> u32;

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), MemoryError>;

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), MemoryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    OutOfRange,
}

/// A directly addressable RAM region such as the SDRAM.
pub struct RamRegion {
    base: u32,
    size: u32,
}

impl RamRegion {
    /// # Safety
    ///
    /// `base..base + size` must be RAM that is not used by the running code.
    pub const unsafe fn new(base: u32, size: u32) -> Self {
        RamRegion { base, size }
    }

    /// The SDRAM execution region of the memory map.
    ///
    /// # Safety
    ///
    /// The memory map must describe the running board and the region must not
    /// hold the running code.
    pub unsafe fn from_memory_map(map: &ObcMemoryMap) -> Option<Self> {
        let (base, size) = map.execution_region()?;
        // Safety: forwarded to the caller.
        Some(unsafe { Self::new(base, size) })
    }

    fn check(&self, offset: u32, len: usize) -> Result<*mut u8, MemoryError> {
        match offset.checked_add(len as u32) {
            Some(end) if end <= self.size => Ok((self.base + offset) as usize as *mut u8),
            _ => Err(MemoryError::OutOfRange),
        }
    }
}

impl ExecutionMemory for RamRegion {
    fn base_address(&self) -> u32 {
        self.base
    }

    fn capacity(&self) -> u32 {
        self.size
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), MemoryError> {
        let dst = self.check(offset, data.len())?;
        // Safety: the range was checked against the region given at construction.
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
        Ok(())
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        let src = self.check(offset, buf.len())?;
        // Safety: the range was checked against the region given at construction.
        unsafe { core::ptr::copy_nonoverlapping(src as *const u8, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyError {
    Source(SourceError),
    /// The source ended before the announced size.
    StreamTooShort { expected: u32, copied: u32 },
    DestinationTooSmall { size: u32, capacity: u32 },
    Destination(MemoryError),
    HammingCode(RecordError),
    /// Block `block` of the image could not be corrected.
    Uncorrectable { block: u32 },
    /// The copy in execution memory differs from what was read.
    CrcMismatch { source: u16, destination: u16 },
    /// The image differs from the CRC recorded when the slot was written.
    ExpectedCrcMismatch { expected: u16, actual: u16 },
}

impl CopyError {
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            CopyError::Uncorrectable { .. }
                | CopyError::CrcMismatch { .. }
                | CopyError::ExpectedCrcMismatch { .. }
        )
    }
}

impl core::fmt::Display for CopyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CopyError::Source(err) => write!(f, "source: {}", err),
            CopyError::StreamTooShort { expected, copied } => {
                write!(f, "stream ended after {} of {} bytes", copied, expected)
            }
            CopyError::DestinationTooSmall { size, capacity } => {
                write!(f, "image of {} bytes exceeds {} bytes", size, capacity)
            }
            CopyError::Destination(_) => write!(f, "execution memory out of range"),
            CopyError::HammingCode(err) => write!(f, "hamming code: {}", err),
            CopyError::Uncorrectable { block } => write!(f, "block {} uncorrectable", block),
            CopyError::CrcMismatch {
                source,
                destination,
            } => write!(f, "crc {:04x} read back as {:04x}", source, destination),
            CopyError::ExpectedCrcMismatch { expected, actual } => {
                write!(f, "crc {:04x}, expected {:04x}", actual, expected)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyResult {
    pub bytes_copied: u32,
    pub crc_match: bool,
    /// CRC of the (corrected) image bytes.
    pub crc: u16,
    pub hamming: HammingOutcome,
    pub error: Option<CopyError>,
}

impl CopyResult {
    pub fn hamming_corrected(&self) -> bool {
        self.hamming.corrected_blocks > 0
    }
}

#[derive(Default)]
struct Progress {
    bytes_copied: u32,
    crc: Crc16Digest,
    hamming: HammingOutcome,
}

/// Copies images chunk by chunk, kicking the watchdog after every chunk.
pub struct ImageCopyEngine {
    chunk_size: usize,
    transfer_retries: u8,
    buffer: [u8; MAX_CHUNK_SIZE],
    code: [u8; MAX_CHUNK_CODE_SIZE],
}

impl ImageCopyEngine {
    pub fn new(config: &BootConfig) -> Self {
        let blocks =
            (config.chunk_size / HAMMING_BLOCK_SIZE).clamp(1, MAX_CHUNK_SIZE / HAMMING_BLOCK_SIZE);
        ImageCopyEngine {
            chunk_size: blocks * HAMMING_BLOCK_SIZE,
            transfer_retries: config.transfer_retries,
            buffer: [0; MAX_CHUNK_SIZE],
            code: [0; MAX_CHUNK_CODE_SIZE],
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Copies the leased image into `destination` and validates the copy.
    ///
    /// With `hamming_codes` set, every chunk is checked against the slot's code
    /// before it is written and the copy stops at the first uncorrectable
    /// block. After the transfer the destination is read back and its CRC
    /// compared with the CRC of the transferred bytes and, when the slot
    /// recorded one, the expected CRC.
    pub fn copy<S: ImageSource + ?Sized>(
        &mut self,
        lease: &mut ImageLease<'_, S>,
        hamming_codes: Option<&mut dyn BootRecordStore>,
        destination: &mut dyn ExecutionMemory,
        watchdog: &mut dyn Watchdog,
    ) -> CopyResult {
        let descriptor = *lease.descriptor();
        let mut progress = Progress::default();
        let outcome = self
            .transfer(lease, &descriptor, hamming_codes, destination, watchdog, &mut progress)
            .and_then(|()| {
                self.validate(&descriptor, progress.crc.value(), destination, watchdog)
            });
        CopyResult {
            bytes_copied: progress.bytes_copied,
            crc_match: outcome.is_ok(),
            crc: progress.crc.value(),
            hamming: progress.hamming,
            error: outcome.err(),
        }
    }

    fn transfer<S: ImageSource + ?Sized>(
        &mut self,
        lease: &mut ImageLease<'_, S>,
        descriptor: &ImageDescriptor,
        mut hamming_codes: Option<&mut dyn BootRecordStore>,
        destination: &mut dyn ExecutionMemory,
        watchdog: &mut dyn Watchdog,
        progress: &mut Progress,
    ) -> Result<(), CopyError> {
        if descriptor.size > destination.capacity() {
            return Err(CopyError::DestinationTooSmall {
                size: descriptor.size,
                capacity: destination.capacity(),
            });
        }

        while progress.bytes_copied < descriptor.size {
            let offset = progress.bytes_copied;
            let len = self.chunk_size.min((descriptor.size - offset) as usize);
            self.read_chunk(lease, offset, len)?;

            if let Some(store) = hamming_codes.as_deref_mut() {
                let code_offset = descriptor.hamming_offset.unwrap_or(0)
                    + offset / HAMMING_BLOCK_SIZE as u32 * HAMMING_CODE_SIZE as u32;
                let code_len = hamming_code_len(len);
                self.read_code(store, descriptor, code_offset, code_len)?;
                let outcome = hamming_verify_256x(&mut self.buffer[..len], &self.code[..code_len])
                    .map_err(|err| match err {
                        HammingError::Uncorrectable { block } => CopyError::Uncorrectable {
                            block: offset / HAMMING_BLOCK_SIZE as u32 + block,
                        },
                        HammingError::CodeTooShort => {
                            CopyError::HammingCode(RecordError::OutOfRange)
                        }
                    })?;
                if !outcome.is_clean() {
                    debug!("Chunk at {:#x}: {:?}", offset, outcome);
                }
                progress.hamming.merge(outcome);
            }

            progress.crc.update(&self.buffer[..len]);
            destination
                .write(offset, &self.buffer[..len])
                .map_err(CopyError::Destination)?;
            progress.bytes_copied += len as u32;
            watchdog.kick();
        }
        Ok(())
    }

    /// Fills `buffer[..len]` from the image. A failed read is repeated up to
    /// `transfer_retries` times; a source that ends early is an error.
    fn read_chunk<S: ImageSource + ?Sized>(
        &mut self,
        lease: &mut ImageLease<'_, S>,
        offset: u32,
        len: usize,
    ) -> Result<(), CopyError> {
        let mut filled = 0;
        let mut retries_left = self.transfer_retries;
        while filled < len {
            match lease.read(offset + filled as u32, &mut self.buffer[filled..len]) {
                Ok(0) => {
                    return Err(CopyError::StreamTooShort {
                        expected: lease.descriptor().size,
                        copied: offset + filled as u32,
                    })
                }
                Ok(n) => filled += n,
                Err(err) if err.is_transfer_failure() && retries_left > 0 => {
                    warn!("Read at {:#x} failed ({}), retrying", offset, err);
                    retries_left -= 1;
                }
                Err(err) => return Err(CopyError::Source(err)),
            }
        }
        Ok(())
    }

    fn read_code(
        &mut self,
        store: &mut dyn BootRecordStore,
        descriptor: &ImageDescriptor,
        code_offset: u32,
        code_len: usize,
    ) -> Result<(), CopyError> {
        let mut retries_left = self.transfer_retries;
        loop {
            match store.read_hamming_code(descriptor.slot, code_offset, &mut self.code[..code_len]) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transfer_failure() && retries_left > 0 => {
                    warn!("Hamming code read failed ({}), retrying", err);
                    retries_left -= 1;
                }
                Err(err) => return Err(CopyError::HammingCode(err)),
            }
        }
    }

    fn validate(
        &mut self,
        descriptor: &ImageDescriptor,
        source_crc: u16,
        destination: &mut dyn ExecutionMemory,
        watchdog: &mut dyn Watchdog,
    ) -> Result<(), CopyError> {
        let mut readback = Crc16Digest::new();
        let mut offset = 0;
        while offset < descriptor.size {
            let len = self.chunk_size.min((descriptor.size - offset) as usize);
            destination
                .read(offset, &mut self.buffer[..len])
                .map_err(CopyError::Destination)?;
            readback.update(&self.buffer[..len]);
            offset += len as u32;
            watchdog.kick();
        }

        if readback.value() != source_crc {
            return Err(CopyError::CrcMismatch {
                source: source_crc,
                destination: readback.value(),
            });
        }
        match descriptor.expected_crc {
            Some(expected) if expected != source_crc => Err(CopyError::ExpectedCrcMismatch {
                expected,
                actual: source_crc,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_region_from_memory_map() {
        let map = ObcMemoryMap::default();
        let region = unsafe { RamRegion::from_memory_map(&map) }.unwrap();
        assert_eq!(region.base_address(), map.sdram_offset);
        assert_eq!(region.capacity(), map.exec_size);
        assert_eq!(region.check(map.exec_size, 1), Err(MemoryError::OutOfRange));

        let map = ObcMemoryMap {
            exec_size: map.sdram_size + 1,
            ..map
        };
        assert!(unsafe { RamRegion::from_memory_map(&map) }.is_none());
    }
}
