// Licensed under the Apache-2.0 license
#![no_std]

//! Shared definitions for the OBC boot images: slot identifiers, the FRAM boot
//! record layout and the lead packet of uplinked binaries.

mod lead_packet;
mod record;
mod slot;

pub use lead_packet::*;
pub use record::*;
pub use slot::*;

/// Size of one Hamming protected block.
pub const HAMMING_BLOCK_SIZE: usize = 256;
/// Size of the code protecting one block.
pub const HAMMING_CODE_SIZE: usize = 3;

/// Length of the Hamming code covering `image_len` bytes. A trailing partial
/// block is protected as if zero padded.
pub const fn hamming_code_len(image_len: usize) -> usize {
    image_len.div_ceil(HAMMING_BLOCK_SIZE) * HAMMING_CODE_SIZE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    InvalidLength,
    InvalidBinaryType(u8),
    NoPackets,
    EmptyBinary,
    InvalidHammingOffset,
    /// FRAM has no room for the Hamming code regions.
    FramTooSmall,
}

impl core::fmt::Display for ImageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ImageError::InvalidLength => write!(f, "invalid lead packet length"),
            ImageError::InvalidBinaryType(t) => write!(f, "invalid binary type {}", t),
            ImageError::NoPackets => write!(f, "lead packet announces no packets"),
            ImageError::EmptyBinary => write!(f, "lead packet announces an empty binary"),
            ImageError::InvalidHammingOffset => write!(f, "invalid hamming code offset"),
            ImageError::FramTooSmall => write!(f, "FRAM too small for hamming code regions"),
        }
    }
}
