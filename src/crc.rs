//! CRC-32/IEEE (polynomial 0xEDB88320), table-driven.

use std::sync::OnceLock;

const POLYNOMIAL: u32 = 0xEDB8_8320;

fn table() -> &'static [u32; 256] {
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ POLYNOMIAL } else { crc >> 1 };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    })
}

/// Folds `bytes` into a running CRC-32.
///
/// `seed` carries the inverted running state across chunks: pass `0` for
/// the first chunk of a stream and the previous call's return value for
/// subsequent chunks. The empty slice with seed `0` returns `0`.
pub fn crc32(bytes: &[u8], seed: u32) -> u32 {
    if bytes.is_empty() {
        return seed;
    }
    let table = table();
    let mut crc = seed ^ 0xFFFF_FFFF;
    for &byte in bytes {
        crc = (crc >> 8) ^ table[((crc ^ byte as u32) & 0xFF) as usize];
    }
    crc ^ 0xFFFF_FFFF
}
