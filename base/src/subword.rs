//! Convenience utilities for splitting 36-bit words into smaller
//! components and for joining them together.
use crate::word::{Word, HALF_MASK};

/// Split a 36-bit word into its left and right half-words.
pub fn split_halves(w: Word) -> (u32, u32) {
    (w.lh(), w.rh())
}

/// Join two 18-bit values into a 36-bit word.
pub fn join_halves(left: u32, right: u32) -> Word {
    Word::from_halves(left, right)
}

/// Extract the left (more-significant) half-word.
pub fn left_half(word: Word) -> u32 {
    word.lh()
}

/// Extract the right (less-significant) half-word.
pub fn right_half(word: Word) -> u32 {
    word.rh()
}

/// Add two half-words, wrapping at 18 bits.
pub fn half_add(a: u32, b: u32) -> u32 {
    a.wrapping_add(b) & HALF_MASK
}

/// Sign-extend an 18-bit half-word to a full 36-bit word.
pub fn sign_extend_half(h: u32) -> Word {
    let h = h & HALF_MASK;
    if h & 0o400_000 != 0 {
        Word::from_halves(HALF_MASK, h)
    } else {
        Word::from_halves(0, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_add_wraps() {
        assert_eq!(half_add(0o777_777, 2), 1);
    }

    #[test]
    fn test_sign_extend_half() {
        assert_eq!(sign_extend_half(0o777_776), Word::from_signed(-2));
        assert_eq!(sign_extend_half(0o000_005), Word::from_signed(5));
    }

    #[test]
    fn test_split_join() {
        let w = join_halves(0o1, 0o2);
        assert_eq!(split_halves(w), (1, 2));
        assert_eq!(left_half(w), 1);
        assert_eq!(right_half(w), 2);
    }
}
