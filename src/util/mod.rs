//! Utility module
//!
//! Byte layouts shared by the pollers that encode slots and by clients that
//! decode them. Numbers are little-endian; strings are NUL padded.

/// Encodes `s` into exactly `len` bytes, truncating or NUL padding
pub fn encode_fixed_str(s: &str, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let bytes = s.as_bytes();
    let n = bytes.len().min(len);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Decodes a NUL padded string slot
pub fn decode_fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Decodes an `f32` slot
pub fn decode_f32(bytes: &[u8]) -> Option<f32> {
    Some(f32::from_le_bytes(bytes.try_into().ok()?))
}

/// Decodes a `u64` slot
pub fn decode_u64(bytes: &[u8]) -> Option<u64> {
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}
