//! Payload masking (RFC 6455 Section 5.3)

/// XOR byte `i` of `data` with `key[i % 4]`.
///
/// Masking is its own inverse, so this both masks and unmasks.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}
