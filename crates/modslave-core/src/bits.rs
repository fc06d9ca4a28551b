//! LSB-first bit packing for coil and discrete-input payloads.
//!
//! Bit `i` of a sequence lives in byte `i / 8` at mask `1 << (i % 8)`. Unused
//! high bits of the last byte are zero.

use alloc::vec::Vec;

/// Bytes needed to carry `bit_count` packed bits.
pub const fn packed_len(bit_count: usize) -> usize {
    bit_count.div_ceil(8)
}

pub fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    let mut out = alloc::vec![0u8; packed_len(bits.len())];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            out[i / 8] |= 1u8 << (i % 8);
        }
    }
    out
}

/// Unpacks every bit of `bytes`, padding included. Callers slice the result
/// down to the number of points they asked for.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |i| (byte >> i) & 0x01 == 0x01))
        .collect()
}
