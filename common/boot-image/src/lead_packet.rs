// Licensed under the Apache-2.0 license

use crate::{hamming_code_len, ImageError, SlotId};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Kind of binary announced by the lead packet of an uplinked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BinaryType {
    Bootloader = 0,
    NorFlash = 1,
    SdCard1Slot1 = 2,
    SdCard1Slot2 = 3,
    SdCard2Slot1 = 4,
    SdCard2Slot2 = 5,
}

impl BinaryType {
    pub fn target_slot(self) -> SlotId {
        match self {
            BinaryType::Bootloader => SlotId::BootloaderPrimary,
            BinaryType::NorFlash => SlotId::NorFlash,
            BinaryType::SdCard1Slot1 => SlotId::Sdc0Slot0,
            BinaryType::SdCard1Slot2 => SlotId::Sdc0Slot1,
            BinaryType::SdCard2Slot1 => SlotId::Sdc1Slot0,
            BinaryType::SdCard2Slot2 => SlotId::Sdc1Slot1,
        }
    }
}

/// Wire header of the first packet of an uplinked binary. Multi-byte fields are
/// transmitted big-endian.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct LeadPacketHeader {
    pub binary_type: u8,
    pub number_of_packets: U16<BigEndian>,
    pub binary_size: U32<BigEndian>,
    pub hamming_code_offset: U32<BigEndian>,
}

pub const LEAD_PACKET_HEADER_SIZE: usize = core::mem::size_of::<LeadPacketHeader>();

impl LeadPacketHeader {
    pub fn new(
        binary_type: BinaryType,
        number_of_packets: u16,
        binary_size: u32,
        hamming_code_offset: u32,
    ) -> Self {
        LeadPacketHeader {
            binary_type: binary_type.into(),
            number_of_packets: U16::new(number_of_packets),
            binary_size: U32::new(binary_size),
            hamming_code_offset: U32::new(hamming_code_offset),
        }
    }
}

/// A lead packet that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadPacket {
    pub binary_type: BinaryType,
    pub number_of_packets: u16,
    pub binary_size: u32,
    pub hamming_code_offset: Option<u32>,
}

impl LeadPacket {
    pub fn parse(bytes: &[u8]) -> Result<Self, ImageError> {
        let header =
            LeadPacketHeader::read_from_bytes(bytes).map_err(|_| ImageError::InvalidLength)?;
        Self::try_from(&header)
    }

    pub fn target_slot(&self) -> SlotId {
        self.binary_type.target_slot()
    }

    /// Number of image bytes preceding the Hamming code, if any.
    pub fn image_size(&self) -> u32 {
        self.hamming_code_offset.unwrap_or(self.binary_size)
    }

    pub fn hamming_code_size(&self) -> u32 {
        self.binary_size - self.image_size()
    }
}

impl TryFrom<&LeadPacketHeader> for LeadPacket {
    type Error = ImageError;

    fn try_from(header: &LeadPacketHeader) -> Result<Self, Self::Error> {
        let binary_type = BinaryType::try_from(header.binary_type)
            .map_err(|_| ImageError::InvalidBinaryType(header.binary_type))?;
        let number_of_packets = header.number_of_packets.get();
        if number_of_packets == 0 {
            return Err(ImageError::NoPackets);
        }
        let binary_size = header.binary_size.get();
        if binary_size == 0 {
            return Err(ImageError::EmptyBinary);
        }
        let hamming_code_offset = match header.hamming_code_offset.get() {
            0 => None,
            offset => {
                if offset >= binary_size
                    || (binary_size - offset) as usize != hamming_code_len(offset as usize)
                {
                    return Err(ImageError::InvalidHammingOffset);
                }
                Some(offset)
            }
        };
        Ok(LeadPacket {
            binary_type,
            number_of_packets,
            binary_size,
            hamming_code_offset,
        })
    }
}
