// Licensed under the Apache-2.0 license

//! Hamming(256x) code as used by the AT91 NAND/NOR tooling.
//!
//! Every 256-byte block is protected by three code bytes: two bytes of
//! interleaved line parity (which byte) and one byte of column parity (which
//! bit). The stored code is bit-inverted. A single flipped data bit produces a
//! syndrome with exactly eleven bits set and can be corrected; a syndrome with
//! one bit set means the code itself was hit.

use boot_image::{hamming_code_len, HAMMING_BLOCK_SIZE, HAMMING_CODE_SIZE};

/// Result of checking a single block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HammingResult {
    Ok,
    /// A flipped data bit was repaired in place.
    CorrectedSingleBit { byte: u8, bit: u8 },
    /// One bit of the stored code was flipped, the data is intact.
    EccCorrupted,
    Uncorrectable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HammingError {
    /// The code buffer does not cover the data buffer.
    CodeTooShort,
    /// Block `block` holds more errors than can be corrected.
    Uncorrectable { block: u32 },
}

/// Accumulated outcome of checking a multi-block buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HammingOutcome {
    pub corrected_blocks: u32,
    pub ecc_corrupted_blocks: u32,
}

impl HammingOutcome {
    pub fn merge(&mut self, other: HammingOutcome) {
        self.corrected_blocks += other.corrected_blocks;
        self.ecc_corrupted_blocks += other.ecc_corrupted_blocks;
    }

    pub fn is_clean(&self) -> bool {
        self.corrected_blocks == 0 && self.ecc_corrupted_blocks == 0
    }
}

/// Computes the three code bytes of a 256-byte block.
pub fn hamming_compute_256(data: &[u8; HAMMING_BLOCK_SIZE]) -> [u8; HAMMING_CODE_SIZE] {
    let mut column_sum = 0u8;
    let mut even_line_code = 0u8;
    let mut odd_line_code = 0u8;
    let mut even_column_code = 0u8;
    let mut odd_column_code = 0u8;

    for (i, &byte) in data.iter().enumerate() {
        column_sum ^= byte;
        if byte.count_ones() & 1 == 1 {
            even_line_code ^= 255 - i as u8;
            odd_line_code ^= i as u8;
        }
    }

    for i in 0..8u8 {
        if column_sum & 1 == 1 {
            even_column_code ^= 7 - i;
            odd_column_code ^= i;
        }
        column_sum >>= 1;
    }

    // Interleave odd/even parity bits, most significant first.
    let mut code = [0u8; HAMMING_CODE_SIZE];
    for _ in 0..4 {
        code[0] <<= 2;
        code[1] <<= 2;
        code[2] <<= 2;

        if odd_line_code & 0x80 != 0 {
            code[0] |= 2;
        }
        if even_line_code & 0x80 != 0 {
            code[0] |= 1;
        }
        if odd_line_code & 0x08 != 0 {
            code[1] |= 2;
        }
        if even_line_code & 0x08 != 0 {
            code[1] |= 1;
        }
        if odd_column_code & 0x04 != 0 {
            code[2] |= 2;
        }
        if even_column_code & 0x04 != 0 {
            code[2] |= 1;
        }

        odd_line_code <<= 1;
        even_line_code <<= 1;
        odd_column_code <<= 1;
        even_column_code <<= 1;
    }

    code.map(|c| !c)
}

/// Checks a block against its stored code, repairing a single flipped data bit.
pub fn hamming_verify_256(
    data: &mut [u8; HAMMING_BLOCK_SIZE],
    code: &[u8; HAMMING_CODE_SIZE],
) -> HammingResult {
    let computed = hamming_compute_256(data);
    let syndrome = [
        computed[0] ^ code[0],
        computed[1] ^ code[1],
        computed[2] ^ code[2],
    ];
    if syndrome == [0, 0, 0] {
        return HammingResult::Ok;
    }

    match syndrome.iter().map(|b| b.count_ones()).sum::<u32>() {
        11 => {
            let [c0, c1, c2] = syndrome;
            let byte = (c0 & 0x80)
                | ((c0 << 1) & 0x40)
                | ((c0 << 2) & 0x20)
                | ((c0 << 3) & 0x10)
                | ((c1 >> 4) & 0x08)
                | ((c1 >> 3) & 0x04)
                | ((c1 >> 2) & 0x02)
                | ((c1 >> 1) & 0x01);
            let bit = ((c2 >> 5) & 0x04) | ((c2 >> 4) & 0x02) | ((c2 >> 3) & 0x01);
            data[byte as usize] ^= 1 << bit;
            HammingResult::CorrectedSingleBit { byte, bit }
        }
        1 => HammingResult::EccCorrupted,
        _ => HammingResult::Uncorrectable,
    }
}

fn padded_block(chunk: &[u8]) -> [u8; HAMMING_BLOCK_SIZE] {
    let mut block = [0u8; HAMMING_BLOCK_SIZE];
    block[..chunk.len()].copy_from_slice(chunk);
    block
}

/// Computes the code of a buffer of any length. A trailing partial block is
/// encoded as if zero padded.
pub fn hamming_compute_256x(data: &[u8], code: &mut [u8]) -> Result<(), HammingError> {
    if code.len() < hamming_code_len(data.len()) {
        return Err(HammingError::CodeTooShort);
    }
    for (chunk, out) in data
        .chunks(HAMMING_BLOCK_SIZE)
        .zip(code.chunks_exact_mut(HAMMING_CODE_SIZE))
    {
        out.copy_from_slice(&hamming_compute_256(&padded_block(chunk)));
    }
    Ok(())
}

/// Verifies and repairs a buffer of any length. Stops at the first block that
/// cannot be corrected.
pub fn hamming_verify_256x(data: &mut [u8], code: &[u8]) -> Result<HammingOutcome, HammingError> {
    if code.len() < hamming_code_len(data.len()) {
        return Err(HammingError::CodeTooShort);
    }
    let mut outcome = HammingOutcome::default();
    for (block, (chunk, stored)) in data
        .chunks_mut(HAMMING_BLOCK_SIZE)
        .zip(code.chunks_exact(HAMMING_CODE_SIZE))
        .enumerate()
    {
        let mut padded = padded_block(chunk);
        let stored = [stored[0], stored[1], stored[2]];
        match hamming_verify_256(&mut padded, &stored) {
            HammingResult::Ok => {}
            HammingResult::CorrectedSingleBit { .. } => {
                outcome.corrected_blocks += 1;
                let len = chunk.len();
                chunk.copy_from_slice(&padded[..len]);
            }
            HammingResult::EccCorrupted => outcome.ecc_corrupted_blocks += 1,
            HammingResult::Uncorrectable => {
                return Err(HammingError::Uncorrectable {
                    block: block as u32,
                })
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn random_block(rng: &mut impl Rng) -> [u8; HAMMING_BLOCK_SIZE] {
        let mut block = [0u8; HAMMING_BLOCK_SIZE];
        rng.fill(&mut block[..]);
        block
    }

    #[test]
    fn test_zero_block_code() {
        // All parities are zero, so the inverted code is all ones.
        assert_eq!(hamming_compute_256(&[0u8; 256]), [0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_clean_block_verifies() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut block = random_block(&mut rng);
        let code = hamming_compute_256(&block);
        assert_eq!(hamming_verify_256(&mut block, &code), HammingResult::Ok);
    }

    #[test]
    fn test_single_bit_flip_is_corrected() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        for _ in 0..64 {
            let original = random_block(&mut rng);
            let code = hamming_compute_256(&original);
            let byte = rng.gen_range(0..HAMMING_BLOCK_SIZE);
            let bit = rng.gen_range(0..8u8);
            let mut damaged = original;
            damaged[byte] ^= 1 << bit;

            assert_eq!(
                hamming_verify_256(&mut damaged, &code),
                HammingResult::CorrectedSingleBit {
                    byte: byte as u8,
                    bit
                }
            );
            assert_eq!(damaged, original);
        }
    }

    #[test]
    fn test_flipped_code_bit_is_reported() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mut block = random_block(&mut rng);
        let original = block;
        let mut code = hamming_compute_256(&block);
        code[1] ^= 0x10;
        assert_eq!(
            hamming_verify_256(&mut block, &code),
            HammingResult::EccCorrupted
        );
        assert_eq!(block, original);
    }

    #[test]
    fn test_double_bit_flip_is_uncorrectable() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(4);
        for _ in 0..64 {
            let mut block = random_block(&mut rng);
            let code = hamming_compute_256(&block);
            let first = rng.gen_range(0..HAMMING_BLOCK_SIZE * 8);
            let mut second = rng.gen_range(0..HAMMING_BLOCK_SIZE * 8);
            while second == first {
                second = rng.gen_range(0..HAMMING_BLOCK_SIZE * 8);
            }
            block[first / 8] ^= 1 << (first % 8);
            block[second / 8] ^= 1 << (second % 8);
            assert_eq!(
                hamming_verify_256(&mut block, &code),
                HammingResult::Uncorrectable
            );
        }
    }

    #[test]
    fn test_multi_block_buffer_with_partial_tail() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let mut data = vec![0u8; 1000];
        rng.fill(&mut data[..]);
        let original = data.clone();
        let mut code = vec![0u8; hamming_code_len(data.len())];
        hamming_compute_256x(&data, &mut code).unwrap();
        assert_eq!(code.len(), 12);

        data[3] ^= 0x01;
        data[990] ^= 0x80;
        let outcome = hamming_verify_256x(&mut data, &code).unwrap();
        assert_eq!(outcome.corrected_blocks, 2);
        assert_eq!(data, original);

        data[600] ^= 0x03;
        assert_eq!(
            hamming_verify_256x(&mut data, &code),
            Err(HammingError::Uncorrectable { block: 2 })
        );
        assert_eq!(
            hamming_verify_256x(&mut data, &code[..9]),
            Err(HammingError::CodeTooShort)
        );
    }
}
