//! WebSocket frame masking
//!
//! XORs payload bytes with a repeating 4-byte key. Used to unmask client
//! frames on receive; the server never masks what it sends.

/// Apply a WebSocket mask in place
///
/// Masking is an involution: applying the same key twice restores the input.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    if data.is_empty() {
        return;
    }

    let mask_u64 = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    // Process 8 bytes at a time
    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ mask_u64;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    // Tail starts at a multiple of 8, so the key phase is unchanged
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_reference(data: &mut [u8], mask: [u8; 4]) {
        for (i, b) in data.iter_mut().enumerate() {
            *b ^= mask[i % 4];
        }
    }

    #[test]
    fn test_matches_bytewise_xor() {
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        for len in [0, 1, 3, 7, 8, 9, 15, 16, 33, 100] {
            let original: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let mut fast = original.clone();
            let mut slow = original.clone();
            apply_mask(&mut fast, mask);
            mask_reference(&mut slow, mask);
            assert_eq!(fast, slow, "length {len}");
        }
    }

    #[test]
    fn test_involution() {
        let mask = [1, 2, 3, 4];
        let mut data = b"Hello, WebSocket!".to_vec();
        apply_mask(&mut data, mask);
        assert_ne!(&data, b"Hello, WebSocket!");
        apply_mask(&mut data, mask);
        assert_eq!(&data, b"Hello, WebSocket!");
    }
}
