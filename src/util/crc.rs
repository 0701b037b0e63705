//! CRC32C checksum utilities.
//!
//! Stored checksums are masked: computing the CRC of a string that itself
//! contains embedded CRCs is prone to collisions, so every checksum written
//! to disk goes through [`mask_crc`] first.

const MASK_DELTA: u32 = 0xa282_ead8;

/// Compute the CRC32C checksum of the given data.
pub fn crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Extend an existing CRC32C with more data.
///
/// `crc32c_extend(crc32c(a), b) == crc32c(a ++ b)`.
pub fn crc32c_extend(crc: u32, data: &[u8]) -> u32 {
    crc32c::crc32c_append(crc, data)
}

/// Mask a CRC value for storage.
pub fn mask_crc(crc: u32) -> u32 {
    // Rotate right by 15 bits and add a constant.
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Unmask a masked CRC value.
pub fn unmask_crc(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}
