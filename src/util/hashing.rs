//! Canonical encodings for digests over structured data.
//!
//! Used by the change fingerprint, where a run of independent fields (paths,
//! change kinds, optional hashes) is fed into one SHA-256.

use sha2::{Digest, Sha256};

/// Hashes a byte field with an explicit length prefix.
///
/// Length-prefixing avoids delimiter ambiguities (for example a path that
/// embeds a separator) that could otherwise make distinct sequences of fields
/// serialize to identical byte streams.
pub(crate) fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    hasher.update(len.to_be_bytes());
    hasher.update(bytes);
}

/// Hashes a fixed-width integer field.
pub(crate) fn hash_u64_field(hasher: &mut Sha256, value: u64) {
    hasher.update(value.to_be_bytes());
}

/// Hashes an optional field, keeping `None` distinct from `Some("")`.
pub(crate) fn hash_optional_field(hasher: &mut Sha256, value: Option<&[u8]>) {
    match value {
        Some(bytes) => {
            hasher.update([1u8]);
            hash_field(hasher, bytes);
        }
        None => hasher.update([0u8]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest_hex(hasher: Sha256) -> String {
        format!("{:x}", hasher.finalize())
    }

    #[test]
    fn hash_field_matches_explicit_length_prefix_encoding() {
        let payload = b"a|b\nc";

        let mut via_helper = Sha256::new();
        hash_field(&mut via_helper, payload);

        let mut manual = Sha256::new();
        manual.update((payload.len() as u64).to_be_bytes());
        manual.update(payload);

        assert_eq!(digest_hex(via_helper), digest_hex(manual));
    }

    #[test]
    fn hash_field_prevents_boundary_collision() {
        let mut split_one = Sha256::new();
        hash_field(&mut split_one, b"a");
        hash_field(&mut split_one, b"bc");

        let mut split_two = Sha256::new();
        hash_field(&mut split_two, b"ab");
        hash_field(&mut split_two, b"c");

        assert_ne!(digest_hex(split_one), digest_hex(split_two));
    }

    #[test]
    fn hash_u64_field_matches_manual_big_endian_bytes() {
        let value = 0x0123_4567_89ab_cdef_u64;

        let mut via_helper = Sha256::new();
        hash_u64_field(&mut via_helper, value);

        let mut manual = Sha256::new();
        manual.update(value.to_be_bytes());

        assert_eq!(digest_hex(via_helper), digest_hex(manual));
    }

    #[test]
    fn optional_field_distinguishes_absent_from_empty() {
        let mut absent = Sha256::new();
        hash_optional_field(&mut absent, None);

        let mut empty = Sha256::new();
        hash_optional_field(&mut empty, Some(b""));

        assert_ne!(digest_hex(absent), digest_hex(empty));
    }
}
