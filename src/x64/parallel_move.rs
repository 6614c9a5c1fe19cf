//! Parallel placement of staged call arguments.
//!
//! When a call is staged every argument already sits somewhere: a register,
//! a frame slot or an immediate. Moving them into their convention slots has
//! to behave as if all moves happened at once, because an argument's source
//! register may be another argument's target. Moves whose target is still
//! needed as a source wait; when only such moves remain they form cycles,
//! which are broken by parking one target in the bank's scratch register.

use bumpalo::{collections::Vec as BumpVec, Bump};

use super::calling_convention::SysVAssigner;
use super::encoder::{EncodingError, X64Encoder};
use crate::core::register_file::{AsmReg, RegBank};
use crate::core::storage::Location;

/// Where a staged value has to end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveTarget {
    Register(AsmReg),
    /// Outgoing argument slot at this offset from rsp.
    Outgoing(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingMove {
    target: MoveTarget,
    source: Location,
}

/// A set of moves that must appear to happen simultaneously.
pub struct ParallelMove<'a> {
    moves: BumpVec<'a, PendingMove>,
}

impl<'a> ParallelMove<'a> {
    pub fn new(arena: &'a Bump) -> Self {
        Self { moves: BumpVec::new_in(arena) }
    }

    pub fn add(&mut self, target: MoveTarget, source: Location) {
        self.moves.push(PendingMove { target, source });
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Emit every move. Returns the number of instructions emitted.
    ///
    /// Outgoing stack slots are written first, while every source is still
    /// intact; then XMM registers, then GP registers. The GP scratch register
    /// is only reused for immediates once no GP cycle can be holding it.
    pub fn emit(self, encoder: &mut X64Encoder) -> Result<usize, EncodingError> {
        let before = encoder.instruction_count();
        let mut xmm = Vec::new();
        let mut gp = Vec::new();

        for mv in self.moves.iter() {
            match mv.target {
                MoveTarget::Outgoing(offset) => store_outgoing(encoder, offset, mv.source)?,
                MoveTarget::Register(reg) => match reg.bank {
                    RegBank::Xmm => xmm.push((reg, mv.source)),
                    RegBank::GeneralPurpose => gp.push((reg, mv.source)),
                },
            }
        }

        resolve_bank(encoder, xmm, SysVAssigner::SCRATCH_XMM)?;
        resolve_bank(encoder, gp, SysVAssigner::SCRATCH_GP)?;

        Ok(encoder.instruction_count() - before)
    }
}

fn store_outgoing(encoder: &mut X64Encoder, offset: i32, source: Location) -> Result<(), EncodingError> {
    let scratch = SysVAssigner::SCRATCH_GP;
    match source {
        Location::Register(reg) => encoder.mov_mem_reg(AsmReg::RSP, offset, reg),
        Location::Stack(frame_offset) => {
            encoder.mov_reg_mem(scratch, AsmReg::RBP, frame_offset)?;
            encoder.mov_mem_reg(AsmReg::RSP, offset, scratch)
        }
        Location::Immediate(bits) => {
            encoder.mov_reg_imm(scratch, bits)?;
            encoder.mov_mem_reg(AsmReg::RSP, offset, scratch)
        }
    }
}

/// Load `source` into `target`.
pub(crate) fn load(encoder: &mut X64Encoder, target: AsmReg, source: Location) -> Result<(), EncodingError> {
    match source {
        Location::Register(reg) => encoder.mov_reg_reg(target, reg),
        Location::Stack(offset) => encoder.mov_reg_mem(target, AsmReg::RBP, offset),
        Location::Immediate(bits) => match target.bank {
            RegBank::GeneralPurpose => encoder.mov_reg_imm(target, bits),
            RegBank::Xmm => {
                encoder.mov_reg_imm(SysVAssigner::SCRATCH_GP, bits)?;
                encoder.mov_reg_reg(target, SysVAssigner::SCRATCH_GP)
            }
        },
    }
}

fn resolve_bank(
    encoder: &mut X64Encoder,
    mut pending: Vec<(AsmReg, Location)>,
    scratch: AsmReg,
) -> Result<(), EncodingError> {
    pending.retain(|&(target, source)| source != Location::Register(target));

    while !pending.is_empty() {
        let ready = pending.iter().position(|&(target, _)| {
            !pending
                .iter()
                .any(|&(_, source)| source == Location::Register(target))
        });

        match ready {
            Some(index) => {
                let (target, source) = pending.remove(index);
                load(encoder, target, source)?;
            }
            None => {
                // Every remaining target is still read by another move: a cycle.
                let (blocked, _) = pending[0];
                log::trace!("breaking move cycle at {blocked} through {scratch}");
                encoder.mov_reg_reg(scratch, blocked)?;
                for (_, source) in pending.iter_mut() {
                    if *source == Location::Register(blocked) {
                        *source = Location::Register(scratch);
                    }
                }
            }
        }
    }
    Ok(())
}
