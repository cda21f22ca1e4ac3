//! The prelude exports the structs which are useful in representing
//! things to do with the machine.  Providing this prelude is the main
//! purpose of the base crate.
pub use super::instruction::*;
pub use super::subword::{
    half_add, join_halves, left_half, right_half, sign_extend_half, split_halves,
};
pub use super::types::IndexBy;
pub use super::types::*;
pub use super::w36;
pub use super::word::*;
