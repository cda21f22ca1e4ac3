//! The `base` crate defines the machine-level things which are
//! useful both in the emulator and in associated tools: the 36-bit
//! word, addresses, and the instruction format.  The idea is that if
//! you want to write a loader or a disassembler, it would depend on
//! the base crate but would not need to depend on the emulator
//! library itself.

mod types;
mod word;

pub mod instruction;
pub mod prelude;
pub mod subword;

pub use crate::types::*;
pub use crate::word::*;

#[macro_export]
macro_rules! w36 {
    ($lh:expr, $rh:expr) => {
        $crate::prelude::Word::from_halves($lh, $rh)
    };
}

#[test]
fn test_w36() {
    use prelude::Word;
    let m: Word = w36!(0o1, 0o2);
    let n: Word = Word::new(0o1_000002);
    assert_eq!(m, n);
}
