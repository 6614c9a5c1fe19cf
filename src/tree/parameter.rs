//! Parameters of the compiled function.
//!
//! The prologue copies every incoming parameter into a home slot in the
//! frame. A parameter node's value is that slot, handed out as a borrowed
//! storage so consumers never release it.

use crate::core::error::{CompileError, CompileResult};
use crate::core::storage::{Location, RawStorage};
use crate::core::types::ValueKind;
use crate::x64::function_codegen::FunctionCodegen;

/// Same pressure as a constant: the home slot is a valid memory operand.
pub(crate) fn label(is_left: bool) -> u32 {
    u32::from(is_left)
}

pub(crate) fn generate(
    codegen: &FunctionCodegen<'_>,
    index: usize,
    kind: ValueKind,
) -> CompileResult<RawStorage> {
    let home = codegen
        .param_home(index)
        .ok_or(CompileError::ParameterMismatch { index, expected: None, found: kind })?;
    Ok(RawStorage::borrowed(Location::Stack(home), kind))
}
