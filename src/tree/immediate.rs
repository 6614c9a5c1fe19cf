//! Constant leaves.

use crate::core::storage::{Location, RawStorage};
use crate::core::types::ValueKind;

/// Register count of a constant.
///
/// A right operand can be encoded directly into the instruction that
/// consumes it; a left operand has to be materialized into a register.
pub(crate) fn label(is_left: bool) -> u32 {
    u32::from(is_left)
}

/// Constants generate no code: their storage is the immediate itself.
pub(crate) fn generate(kind: ValueKind, bits: u64) -> RawStorage {
    RawStorage::owned(Location::Immediate(bits), kind)
}

/// Whether a 64-bit pattern survives sign extension from 32 bits.
pub(crate) fn fits_i32(bits: u64) -> bool {
    i32::try_from(bits as i64).is_ok()
}
