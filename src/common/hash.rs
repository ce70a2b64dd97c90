//! Hashing utilities for tierkv
//!
//! - BLAKE3 for key placement within a tier

/// Compute the 64-bit placement hash of a key
pub fn key_hash(key: &[u8]) -> u64 {
    let hash = blake3::hash(key);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(prefix)
}

/// Compute shard index for a key (stable for a fixed shard count)
pub fn shard_index(key: &[u8], num_shards: usize) -> usize {
    debug_assert!(num_shards > 0);
    (key_hash(key) % num_shards as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_index_deterministic() {
        let key = b"test-key";
        assert_eq!(shard_index(key, 16), shard_index(key, 16));
        assert!(shard_index(key, 16) < 16);
    }

    #[test]
    fn test_single_shard() {
        for i in 0u32..100 {
            assert_eq!(shard_index(&i.to_le_bytes(), 1), 0);
        }
    }

    #[test]
    fn test_keys_spread_across_shards() {
        let mut seen = [false; 4];
        for i in 0u32..256 {
            seen[shard_index(&i.to_le_bytes(), 4)] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
