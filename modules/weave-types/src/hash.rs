/// Deterministic content hash for change detection (FNV-1a). Must be
/// stable across process restarts, which rules out `DefaultHasher`
/// (randomized per-process to resist HashDoS).
pub fn content_hash(content: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
    for byte in content.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3); // FNV prime
    }
    hash
}

/// Hex-formatted variant used where the hash is stored as a string
/// (manifest files, DB columns, dedup index lookups).
pub fn content_hash_hex(content: &str) -> String {
    format!("{:016x}", content_hash(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_content_same_hash() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
    }

    #[test]
    fn different_content_different_hash() {
        assert_ne!(content_hash("hello"), content_hash("world"));
    }

    #[test]
    fn hex_is_stable_width() {
        assert_eq!(content_hash_hex("").len(), 16);
    }
}
