//! Stable 64-bit hashing used for content addressing and key fingerprints.
//!
//! Unlike `std::collections::hash_map::DefaultHasher`, the output is fixed
//! across processes and Rust releases, so it is safe to persist on disk.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a, 64-bit variant
#[inline]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Lowercase, zero-padded hex encoding of a 64-bit digest (16 chars)
#[inline]
pub fn hex64(digest: u64) -> String {
    format!("{:016x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn test_hex64_is_padded() {
        assert_eq!(hex64(0), "0000000000000000");
        assert_eq!(hex64(0xabc), "0000000000000abc");
        assert_eq!(hex64(u64::MAX).len(), 16);
    }

    #[test]
    fn test_distribution_over_small_modulus() {
        let mut buckets = [0usize; 26];
        for i in 0..26_000 {
            let h = fnv1a_64(format!("key-{}", i).as_bytes());
            buckets[(h % 26) as usize] += 1;
        }
        // Every bucket should be within 30% of the mean
        for count in buckets {
            assert!((700..1300).contains(&count), "skewed bucket: {}", count);
        }
    }
}
