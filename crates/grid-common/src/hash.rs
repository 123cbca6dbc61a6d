//! Cheap non-cryptographic string hashing for cache keys.

/// 32-bit shift-and-subtract rolling hash (`h = h * 31 + unit`) over the
/// UTF-16 code units of `input`, with wrapping `i32` arithmetic.
///
/// Collisions are possible and acceptable: they only risk serving a cached
/// entry for a different request.
pub fn rolling_hash(input: &str) -> i32 {
    input.encode_utf16().fold(0i32, |hash, unit| {
        (hash << 5).wrapping_sub(hash).wrapping_add(unit as i32)
    })
}

/// Absolute value of [`rolling_hash`] as an unsigned decimal-ready number.
pub fn rolling_hash_abs(input: &str) -> u32 {
    rolling_hash(input).unsigned_abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_hash_known_values() {
        assert_eq!(rolling_hash(""), 0);
        assert_eq!(rolling_hash("a"), 97);
        // 97 * 31 + 98
        assert_eq!(rolling_hash("ab"), 3105);
        // Same as Java's String.hashCode for ASCII input
        assert_eq!(rolling_hash("hello"), 99162322);
    }

    #[test]
    fn test_rolling_hash_wraps() {
        let long = "temperature-2m-above-ground-".repeat(64);
        // Must not panic on overflow and must stay deterministic
        assert_eq!(rolling_hash(&long), rolling_hash(&long));
        assert_eq!(rolling_hash_abs(&long), rolling_hash(&long).unsigned_abs());
    }
}
