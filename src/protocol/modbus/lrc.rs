/// Longitudinal redundancy check: two's complement of the byte sum, mod 256.
pub fn lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte))
        .wrapping_neg()
}

pub fn verify_lrc(data: &[u8], checksum: u8) -> bool {
    lrc(data) == checksum
}
