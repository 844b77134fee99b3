// Licensed under the Apache-2.0 license

//! Integrity codecs protecting boot images: CRC16-CCITT and the Hamming(256x)
//! error correcting code.

mod crc16;
mod hamming;

pub use crc16::*;
pub use hamming::*;
