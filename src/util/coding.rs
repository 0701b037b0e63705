//! Fixed-width little-endian encoding for on-disk headers.

/// Write a fixed 16-bit little-endian integer into the first 2 bytes of `dst`.
pub fn encode_fixed16(dst: &mut [u8], value: u16) {
    dst[..2].copy_from_slice(&value.to_le_bytes());
}

/// Write a fixed 32-bit little-endian integer into the first 4 bytes of `dst`.
pub fn encode_fixed32(dst: &mut [u8], value: u32) {
    dst[..4].copy_from_slice(&value.to_le_bytes());
}

/// Read a fixed 16-bit value from a slice without consuming.
pub fn read_fixed16(data: &[u8]) -> Option<u16> {
    if data.len() < 2 {
        return None;
    }
    Some(u16::from_le_bytes([data[0], data[1]]))
}

/// Read a fixed 32-bit value from a slice without consuming.
pub fn read_fixed32(data: &[u8]) -> Option<u32> {
    if data.len() < 4 {
        return None;
    }
    Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}
