//! The 36-bit word.
//!
//! Words are held in a `u64` whose top 28 bits are always zero.  Bits
//! are numbered in the historic way: bit 0 is the most significant
//! bit (the sign bit) and bit 35 is the least significant.  The
//! left half-word is bits 0-17 and the right half-word is bits 18-35.
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter, Octal};
use std::ops::{BitAnd, BitOr, BitXor, Not};

use serde::Serialize;

#[cfg(test)]
use test_strategy::Arbitrary;

/// Mask covering all 36 bits of a word.
pub const WORD_MASK: u64 = 0o777_777_777_777;

/// Mask covering an 18-bit half-word.
pub const HALF_MASK: u32 = 0o777_777;

const SIGN_BIT: u64 = 0o400_000_000_000;
const MAGNITUDE_MASK: u64 = 0o377_777_777_777;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordTooLarge(pub u64);

impl Display for WordTooLarge {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "value {:o} does not fit in 36 bits", self.0)
    }
}

impl Error for WordTooLarge {}

#[cfg_attr(test, derive(Arbitrary))]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Word(#[cfg_attr(test, strategy(0..=WORD_MASK))] u64);

/// The outcome of a 36-bit two's complement addition, with the carry
/// bits that the processor flags are computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    pub value: Word,
    /// Carry out of bit 0.
    pub carry0: bool,
    /// Carry out of bit 1 (into bit 0).
    pub carry1: bool,
}

impl AddOutcome {
    /// Arithmetic overflow happened when exactly one of the two
    /// carries happened.
    pub fn overflow(&self) -> bool {
        self.carry0 != self.carry1
    }
}

impl Word {
    pub const ZERO: Word = Word(0);
    pub const ONE: Word = Word(1);
    pub const MAX: Word = Word(WORD_MASK);

    /// Build a word from the low 36 bits of `bits`; higher bits are
    /// discarded.
    pub const fn new(bits: u64) -> Word {
        Word(bits & WORD_MASK)
    }

    pub const fn from_halves(lh: u32, rh: u32) -> Word {
        Word((((lh & HALF_MASK) as u64) << 18) | ((rh & HALF_MASK) as u64))
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// The left half-word (bits 0-17).
    pub const fn lh(self) -> u32 {
        ((self.0 >> 18) as u32) & HALF_MASK
    }

    /// The right half-word (bits 18-35).
    pub const fn rh(self) -> u32 {
        (self.0 as u32) & HALF_MASK
    }

    pub const fn with_lh(self, lh: u32) -> Word {
        Word::from_halves(lh, self.rh())
    }

    pub const fn with_rh(self, rh: u32) -> Word {
        Word::from_halves(self.lh(), rh)
    }

    /// Swap the two half-words.
    pub const fn swapped(self) -> Word {
        Word::from_halves(self.rh(), self.lh())
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 & SIGN_BIT != 0
    }

    /// Test a bit using the historic numbering (bit 0 is the sign).
    pub const fn bit(self, n: u32) -> bool {
        assert!(n < 36);
        self.0 & (1 << (35 - n)) != 0
    }

    /// Extract `width` bits whose least significant bit is historic
    /// bit `last`.  For example `field(13, 1)` extracts the indirect
    /// bit of an instruction.
    pub const fn field(self, last: u32, width: u32) -> u64 {
        (self.0 >> (35 - last)) & ((1 << width) - 1)
    }

    pub fn to_signed(self) -> i64 {
        if self.is_negative() {
            (self.0 as i64) - (1_i64 << 36)
        } else {
            self.0 as i64
        }
    }

    pub fn from_signed(n: i64) -> Word {
        Word::new(n as u64)
    }

    fn add_with_carry_in(self, other: Word, carry_in: u64) -> AddOutcome {
        let sum = self.0 + other.0 + carry_in;
        let low = (self.0 & MAGNITUDE_MASK) + (other.0 & MAGNITUDE_MASK) + carry_in;
        AddOutcome {
            value: Word::new(sum),
            carry0: sum & (1 << 36) != 0,
            carry1: low & SIGN_BIT != 0,
        }
    }

    /// Two's complement addition, reporting the carries.
    pub fn add(self, other: Word) -> AddOutcome {
        self.add_with_carry_in(other, 0)
    }

    /// Two's complement subtraction `self - other`, computed the way
    /// the hardware does it (add the complement plus one).
    pub fn sub(self, other: Word) -> AddOutcome {
        self.add_with_carry_in(!other, 1)
    }

    pub fn wrapping_add(self, other: Word) -> Word {
        self.add(other).value
    }

    pub fn wrapping_sub(self, other: Word) -> Word {
        self.sub(other).value
    }

    /// Two's complement negation; also reports the carries (negating
    /// the most negative number overflows).
    pub fn negate(self) -> AddOutcome {
        Word::ZERO.sub(self)
    }
}

impl From<u32> for Word {
    fn from(n: u32) -> Word {
        Word(u64::from(n))
    }
}

impl From<Word> for u64 {
    fn from(w: Word) -> u64 {
        w.0
    }
}

impl TryFrom<u64> for Word {
    type Error = WordTooLarge;
    fn try_from(n: u64) -> Result<Word, WordTooLarge> {
        if n & !WORD_MASK == 0 {
            Ok(Word(n))
        } else {
            Err(WordTooLarge(n))
        }
    }
}

impl Not for Word {
    type Output = Word;
    fn not(self) -> Word {
        Word(!self.0 & WORD_MASK)
    }
}

impl BitAnd for Word {
    type Output = Word;
    fn bitand(self, rhs: Word) -> Word {
        Word(self.0 & rhs.0)
    }
}

impl BitOr for Word {
    type Output = Word;
    fn bitor(self, rhs: Word) -> Word {
        Word(self.0 | rhs.0)
    }
}

impl BitXor for Word {
    type Output = Word;
    fn bitxor(self, rhs: Word) -> Word {
        Word(self.0 ^ rhs.0)
    }
}

/// Words print the way the historic tools print them, as two octal
/// half-words separated by ",,".
impl Display for Word {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:06o},,{:06o}", self.lh(), self.rh())
    }
}

impl Debug for Word {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "Word({self})")
    }
}

impl Octal for Word {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        Octal::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    #[test]
    fn halves() {
        let w = Word::from_halves(0o123456, 0o654321);
        assert_eq!(w.lh(), 0o123456);
        assert_eq!(w.rh(), 0o654321);
        assert_eq!(w.swapped(), Word::from_halves(0o654321, 0o123456));
        assert_eq!(w.to_string(), "123456,,654321");
    }

    #[test]
    fn out_of_range() {
        assert!(Word::try_from(1_u64 << 36).is_err());
        assert_eq!(Word::try_from(WORD_MASK), Ok(Word::MAX));
        assert_eq!(Word::new(1_u64 << 36), Word::ZERO);
    }

    #[test]
    fn bit_numbering() {
        let sign = Word::new(SIGN_BIT);
        assert!(sign.bit(0));
        assert!(!sign.bit(35));
        assert!(Word::ONE.bit(35));
        // The indirect bit of an instruction is bit 13.
        assert_eq!(Word::new(0o000020_000000).field(13, 1), 1);
    }

    #[test]
    fn add_overflow() {
        let most_positive = Word::new(MAGNITUDE_MASK);
        let r = most_positive.add(Word::ONE);
        assert_eq!(r.value, Word::new(SIGN_BIT));
        assert!(r.carry1);
        assert!(!r.carry0);
        assert!(r.overflow());

        let r = Word::MAX.add(Word::ONE);
        assert_eq!(r.value, Word::ZERO);
        assert!(r.carry0 && r.carry1);
        assert!(!r.overflow());
    }

    #[test]
    fn negate_most_negative_overflows() {
        let most_negative = Word::new(SIGN_BIT);
        let r = most_negative.negate();
        assert_eq!(r.value, most_negative);
        assert!(r.overflow());
    }

    #[proptest]
    fn signed_conversion_agrees_with_arithmetic(a: Word, b: Word) {
        let expected = Word::from_signed(a.to_signed() + b.to_signed());
        proptest::prop_assert_eq!(a.wrapping_add(b), expected);
        let expected = Word::from_signed(a.to_signed() - b.to_signed());
        proptest::prop_assert_eq!(a.wrapping_sub(b), expected);
    }
}
