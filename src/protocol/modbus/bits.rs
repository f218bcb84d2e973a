/// Packs coil states LSB first, the first coil landing in bit 0 of byte 0.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut packed = vec![0u8; bits.len().div_ceil(8)];
    for (index, _) in bits.iter().enumerate().filter(|(_, bit)| **bit) {
        packed[index / 8] |= 1 << (index % 8);
    }
    packed
}

pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |i| (*byte & (1 << i)) != 0))
        .take(count)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_lsb_first() {
        let bits = [true, false, true, true, false, false, false, false, true];
        assert_eq!(pack_bits(&bits), vec![0b0000_1101, 0b0000_0001]);
        assert_eq!(unpack_bits(&[0b0000_1101, 0b0000_0001], 9), bits.to_vec());
    }

    #[test]
    fn test_unpack_stops_at_available_bits() {
        assert_eq!(unpack_bits(&[0xFF], 20).len(), 8);
        assert!(pack_bits(&[]).is_empty());
    }
}
