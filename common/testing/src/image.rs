// Licensed under the Apache-2.0 license

//! Test image builders.

use boot_image::hamming_code_len;
use obc_bootloader::integrity::{crc16ccitt_default_start_crc, hamming_compute_256x};
use rand::{Rng, SeedableRng};

/// Deterministic pseudo random image of `len` bytes.
pub fn random_image(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut image = vec![0u8; len];
    rng.fill(&mut image[..]);
    image
}

pub fn hamming_code(image: &[u8]) -> Vec<u8> {
    let mut code = vec![0u8; hamming_code_len(image.len())];
    hamming_compute_256x(image, &mut code).unwrap();
    code
}

pub fn image_crc(image: &[u8]) -> u16 {
    crc16ccitt_default_start_crc(image)
}

/// Flips bit `bit` of byte `byte`.
pub fn flip_bit(data: &mut [u8], byte: usize, bit: u8) {
    data[byte] ^= 1 << bit;
}
