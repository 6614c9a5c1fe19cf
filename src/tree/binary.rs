//! Integer arithmetic nodes.
//!
//! Both operands are labeled like the operands of a two-argument call; the
//! heavier operand is generated first (the left one on ties) so the lighter
//! one runs with as many free registers as possible. The result overwrites
//! the left operand's register.

use super::call::compute_register_count;
use super::immediate::fits_i32;
use super::ExpressionTree;
use crate::core::error::CompileResult;
use crate::core::register_file::{AsmReg, RegBank};
use crate::core::storage::{Location, RawStorage};
use crate::core::types::{NodeId, ValueKind};
use crate::x64::calling_convention::SysVAssigner;
use crate::x64::encoder::ArithOp;

pub(crate) fn label(tree: &mut ExpressionTree<'_>, left: NodeId, right: NodeId) -> CompileResult<u32> {
    tree.label_subtree(left, true)?;
    tree.label_subtree(right, false)?;
    Ok(compute_register_count(
        tree.labeled_count(left)?,
        tree.labeled_count(right)?,
    ))
}

pub(crate) fn generate(
    tree: &mut ExpressionTree<'_>,
    id: NodeId,
    kind: ValueKind,
    op: ArithOp,
    left: NodeId,
    right: NodeId,
    hint: Option<AsmReg>,
) -> CompileResult<RawStorage> {
    let left_count = tree.labeled_count(left)?;
    let right_count = tree.labeled_count(right)?;
    let bank = RegBank::GeneralPurpose;

    let (lhs, rhs) = if right_count > left_count {
        let rhs = tree.generate(right, None)?;
        let rhs = tree.park_if_pressured(rhs, left_count, bank)?;
        let lhs = tree.generate(left, hint)?;
        (lhs, rhs)
    } else {
        let lhs = tree.generate(left, hint)?;
        let lhs = tree.park_if_pressured(lhs, right_count, bank)?;
        let rhs = tree.generate(right, None)?;
        (lhs, rhs)
    };

    let dst = tree.materialize(lhs, Some(id), hint, "evaluating an arithmetic operand")?;
    let encoder = tree.codegen()?.encoder_mut();
    match rhs.location() {
        Location::Immediate(bits) if fits_i32(bits) => encoder.arith_reg_imm(op, dst, bits as i64 as i32)?,
        Location::Immediate(bits) => {
            let scratch = SysVAssigner::SCRATCH_GP;
            encoder.mov_reg_imm(scratch, bits)?;
            encoder.arith_reg_reg(op, dst, scratch)?;
        }
        Location::Stack(offset) => encoder.arith_reg_mem(op, dst, AsmReg::RBP, offset)?,
        Location::Register(reg) => encoder.arith_reg_reg(op, dst, reg)?,
    }
    log::trace!("{} {dst}, {}", op.mnemonic(), rhs.location());
    tree.release_raw(rhs)?;

    Ok(RawStorage::owned(Location::Register(dst), kind))
}
