//! Proof-of-work hashing and 256-bit target arithmetic.

use bitcoin::hashes::{sha256d, Hash};
use primitive_types::U256;

/// Target for difficulty 1, the conventional pool baseline
/// (0x00000000ffff0000...0000).
pub fn diff1_target() -> U256 {
    U256::from(0xffffu64) << 208
}

/// Double SHA-256.
pub fn dsha256(data: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(data).to_byte_array()
}

/// Interpret a 32-byte double-SHA256 digest as a 256-bit little-endian
/// integer, the form compared against targets.
pub fn hash_to_u256(hash: &[u8; 32]) -> U256 {
    U256::from_little_endian(hash)
}

/// Expand a compact (nBits) target into a full 256-bit target.
///
/// Negative targets collapse to zero; targets whose mantissa would shift
/// past 256 bits saturate to `U256::MAX` rather than wrapping.
pub fn target_from_nbits(nbits: u32) -> U256 {
    let mantissa = nbits & 0x007f_ffff;
    let exponent = (nbits >> 24) as i64;

    if nbits & 0x0080_0000 != 0 || mantissa == 0 {
        return U256::zero();
    }

    if exponent <= 3 {
        U256::from(mantissa >> (8 * (3 - exponent)))
    } else {
        let shift = 8 * (exponent - 3) as usize;
        let mantissa_bits = 32 - mantissa.leading_zeros() as usize;
        if shift + mantissa_bits > 256 {
            U256::MAX
        } else {
            U256::from(mantissa) << shift
        }
    }
}

/// Per-share target for a pool difficulty: `diff1_target / difficulty`.
/// Difficulty 0 is treated as 1.
pub fn target_from_difficulty(difficulty: u64) -> U256 {
    diff1_target() / U256::from(difficulty.max(1))
}

/// Difficulty actually achieved by a share hash, saturating at u64::MAX.
pub fn difficulty_of_hash(hash: U256) -> u64 {
    if hash.is_zero() {
        return u64::MAX;
    }
    let diff = diff1_target() / hash;
    if diff.bits() > 64 {
        u64::MAX
    } else {
        diff.as_u64()
    }
}

/// Stable worker id for a fully-qualified worker name, FNV-1a over the
/// lowercased name. Survives reconnects, so worker rows upsert instead of
/// multiplying.
pub fn worker_id(full_name: &str) -> i64 {
    const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in full_name.to_lowercase().bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as i64
}

/// Parse a 64-char big-endian hex hash (block-explorer display order) into
/// internal little-endian bytes.
pub fn hash_from_be_hex(s: &str) -> Option<[u8; 32]> {
    let raw = hex::decode(s).ok()?;
    if raw.len() != 32 {
        return None;
    }
    let mut bytes = [0u8; 32];
    for (i, b) in raw.iter().rev().enumerate() {
        bytes[i] = *b;
    }
    Some(bytes)
}

/// Render internal little-endian hash bytes as big-endian display hex.
pub fn hash_to_be_hex(bytes: &[u8; 32]) -> String {
    let mut rev = *bytes;
    rev.reverse();
    hex::encode(rev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsha256_of_empty_input() {
        // Known vector: dsha256("") starts with 5df6e0e2...
        let h = dsha256(b"");
        assert_eq!(
            hex::encode(h),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn nbits_expansion_matches_known_values() {
        // Mainnet genesis compact target
        let t = target_from_nbits(0x1d00ffff);
        assert_eq!(t, U256::from(0xffffu64) << 208);
        assert_eq!(t, diff1_target());

        // Regtest compact target
        let t = target_from_nbits(0x207fffff);
        assert_eq!(t, U256::from(0x7fffffu64) << 232);

        // Low exponent shifts the mantissa down
        assert_eq!(target_from_nbits(0x01120000), U256::from(0x12u64));
        assert_eq!(target_from_nbits(0x02123400), U256::from(0x1234u64));
    }

    #[test]
    fn nbits_sign_bit_and_zero_mantissa_collapse() {
        assert_eq!(target_from_nbits(0x01803456), U256::zero());
        assert_eq!(target_from_nbits(0x04000000), U256::zero());
    }

    #[test]
    fn nbits_overflow_saturates() {
        assert_eq!(target_from_nbits(0x23000001), U256::MAX);
        assert_eq!(target_from_nbits(0xff123456), U256::MAX);
    }

    #[test]
    fn difficulty_targets_scale_inversely() {
        assert_eq!(target_from_difficulty(1), diff1_target());
        assert_eq!(target_from_difficulty(2), diff1_target() / 2u64);
        assert!(target_from_difficulty(65536) < target_from_difficulty(1));
        // difficulty 0 treated as 1
        assert_eq!(target_from_difficulty(0), diff1_target());
    }

    #[test]
    fn hash_difficulty_roundtrip() {
        assert_eq!(difficulty_of_hash(diff1_target()), 1);
        assert_eq!(difficulty_of_hash(diff1_target() / 4u64), 4);
        assert_eq!(difficulty_of_hash(U256::zero()), u64::MAX);
    }

    #[test]
    fn be_hex_roundtrip() {
        let hex64 = "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054";
        let bytes = hash_from_be_hex(hex64).unwrap();
        // LE internal order puts the leading zero bytes at the tail
        assert_eq!(bytes[31], 0x00);
        assert_eq!(bytes[0], 0x54);
        assert_eq!(hash_to_be_hex(&bytes), hex64);
    }

    #[test]
    fn worker_ids_are_stable_and_case_insensitive() {
        assert_eq!(worker_id("alice.rig0"), worker_id("alice.rig0"));
        assert_eq!(worker_id("Alice.Rig0"), worker_id("alice.rig0"));
        assert_ne!(worker_id("alice.rig0"), worker_id("alice.rig1"));
    }

    #[test]
    fn be_hex_rejects_bad_input() {
        assert!(hash_from_be_hex("abcd").is_none());
        assert!(hash_from_be_hex("zz").is_none());
    }
}
