//! Conversions between 64-bit register words and bit vectors.
use baa::{BitVecOps, BitVecValue};
use num_bigint::BigUint;
use num_traits::One;
use sluice_utils::{mask, words_for};

/// Packs little-endian words into a bit vector of `width` bits. Missing
/// words read as zero and bits above `width` are dropped.
pub fn from_words(words: &[u64], width: u32) -> BitVecValue {
    let len = width.div_ceil(8) as usize;
    let mut bytes: Vec<u8> = words
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .chain(std::iter::repeat(0))
        .take(len)
        .collect();
    if width % 8 != 0 {
        if let Some(top) = bytes.last_mut() {
            *top &= (1u8 << (width % 8)) - 1;
        }
    }
    BitVecValue::from_bytes_le(&bytes, width)
}

/// Splits a bit vector into the words of a `width`-bit register, truncating
/// or zero-extending as needed.
pub fn to_words(value: &BitVecValue, width: u32) -> Vec<u64> {
    let mut words = vec![0u64; words_for(width) as usize];
    for (i, byte) in value.to_bytes_le().into_iter().enumerate() {
        if let Some(word) = words.get_mut(i / 8) {
            *word |= (byte as u64) << ((i % 8) * 8);
        }
    }
    if let Some(last) = words.last_mut() {
        if width % 64 != 0 {
            *last &= mask(width % 64);
        }
    }
    words
}

/// Converts an arbitrary precision integer into a `width`-bit vector,
/// dropping the bits that do not fit.
pub fn from_big(value: &BigUint, width: u32) -> BitVecValue {
    let truncated = value & ((BigUint::one() << width) - 1u32);
    BitVecValue::from_big_uint(&truncated, width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wide_values_split_across_words() {
        let words = vec![u64::MAX, 0b10_1010];
        let bits = from_words(&words, 70);
        assert_eq!(bits.width(), 70);
        assert_eq!(to_words(&bits, 70), vec![u64::MAX, 0b10_1010]);
    }

    #[test]
    fn narrow_targets_truncate() {
        let bits = BitVecValue::from_u64(0x1ff, 9);
        assert_eq!(to_words(&bits, 4), vec![0xf]);
        assert_eq!(to_words(&bits, 100), vec![0x1ff, 0]);
        assert_eq!(from_words(&[0xff], 3).to_u64(), Some(7));
    }

    #[test]
    fn big_integers_are_masked() {
        let big = BigUint::from(0x1_0000_0005u64);
        assert_eq!(from_big(&big, 8).to_u64(), Some(5));
    }

    proptest! {
        #[test]
        fn packing_keeps_exactly_the_low_bits(
            words in prop::collection::vec(any::<u64>(), 0..4),
            width in 1u32..256,
        ) {
            let packed = to_words(&from_words(&words, width), width);
            prop_assert_eq!(packed.len(), words_for(width) as usize);
            for (i, word) in packed.iter().enumerate() {
                let original = words.get(i).copied().unwrap_or(0);
                let kept = width.saturating_sub(i as u32 * 64).min(64);
                prop_assert_eq!(*word, original & mask(kept));
            }
        }
    }
}
