// Licensed under the Apache-2.0 license

use crc::{Crc, CRC_16_IBM_3740};

/// CRC-16/CCITT-FALSE: polynomial 0x1021, MSB first, no reflection, no final xor.
pub static CRC16_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

pub const CRC16_DEFAULT_START: u16 = 0xffff;

/// Computes the CRC of `data` continuing from `starting_crc`. Feeding the result
/// back in as the start of the next chunk yields the CRC of the concatenation.
pub fn crc16ccitt(data: &[u8], starting_crc: u16) -> u16 {
    let mut digest = CRC16_CCITT.digest_with_initial(starting_crc);
    digest.update(data);
    digest.finalize()
}

pub fn crc16ccitt_default_start_crc(data: &[u8]) -> u16 {
    crc16ccitt(data, CRC16_DEFAULT_START)
}

/// Running CRC over a chunked stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16Digest {
    value: u16,
}

impl Crc16Digest {
    pub fn new() -> Self {
        Crc16Digest {
            value: CRC16_DEFAULT_START,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.value = crc16ccitt(data, self.value);
    }

    pub fn value(&self) -> u16 {
        self.value
    }
}

impl Default for Crc16Digest {
    fn default() -> Self {
        Self::new()
    }
}
