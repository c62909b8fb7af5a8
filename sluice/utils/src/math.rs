fn bits_helper(n: u64, i: u64) -> u64 {
    if n == 0 { i } else { bits_helper(n / 2, i + 1) }
}

/// Number of bits needed to encode `n` distinct values. At least one.
pub fn bits_needed_for(n: u64) -> u64 {
    bits_helper(n.saturating_sub(1), 0).max(1)
}

/// Number of 64-bit words a value of `width` bits occupies.
pub fn words_for(width: u32) -> u32 {
    width.div_ceil(64).max(1)
}

/// All-ones mask covering the low `width` bits of a word.
pub fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1_u64 << width) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits() {
        assert_eq!(bits_needed_for(1), 1);
        assert_eq!(bits_needed_for(2), 1);
        assert_eq!(bits_needed_for(5), 3);
        assert_eq!(bits_needed_for(8), 3);
        assert_eq!(bits_needed_for(9), 4);
    }

    #[test]
    fn words() {
        assert_eq!(words_for(1), 1);
        assert_eq!(words_for(64), 1);
        assert_eq!(words_for(65), 2);
        assert_eq!(words_for(128), 2);
    }

    #[test]
    fn masks() {
        assert_eq!(mask(1), 1);
        assert_eq!(mask(16), 0xffff);
        assert_eq!(mask(64), u64::MAX);
        assert_eq!(mask(0), 0);
    }
}
