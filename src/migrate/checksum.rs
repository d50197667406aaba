//! Content checksums for migration scripts.
//!
//! Scripts are hashed with 64-bit FNV-1 (multiply, then xor) and the hash is
//! stored as its unsigned decimal rendering. The value only detects changes
//! to already-applied files, it is not a security measure.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1 hash of `bytes`.
pub fn fnv1_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        hash.wrapping_mul(FNV_PRIME) ^ u64::from(b)
    })
}

/// Checksum string recorded in `schema_version.checksum`.
pub fn checksum(content: &[u8]) -> String {
    fnv1_64(content).to_string()
}
