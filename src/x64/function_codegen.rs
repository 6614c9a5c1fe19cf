// This module wraps instruction emission for one generated function. FunctionCodegen combines
// the X64Encoder, the System V argument assignment and the FunctionFrame: it emits the
// prologue (frame pointer, callee-saved registers, frame reservation, copying every incoming
// parameter into its home slot), hands out and takes back temporary slots, spills
// values, saves and restores registers around calls while tracking how far rsp has moved below
// the frame, and emits the epilogue after moving the result into the return register. The
// tracked push depth is what keeps every emitted call 16-byte aligned.

//! Function code generation with calling conventions.
//!
//! This module provides the bridge between the calling convention and
//! machine code generation for the single function an expression tree
//! compiles into.

use bumpalo::Bump;

use crate::core::register_file::{AsmReg, RegBank};
use crate::core::storage::Location;
use crate::core::types::ValueKind;
use crate::x64::calling_convention::{CCAssigner, CCAssignment, FunctionFrame, SysVAssigner};
use crate::x64::encoder::{EncodingError, X64Encoder};
use crate::x64::parallel_move;

/// Code generator for one function body.
pub struct FunctionCodegen<'arena> {
    /// Machine code encoder.
    encoder: X64Encoder,
    /// Stack frame management.
    frame: FunctionFrame<'arena>,
    /// Where each incoming parameter arrives.
    params: Vec<CCAssignment>,
    /// Bytes currently pushed below the fixed frame.
    pushed: u32,
}

impl<'arena> FunctionCodegen<'arena> {
    /// Create a code generator for a function taking `params`.
    pub fn new(arena: &'arena Bump, params: &[ValueKind], temp_slots: usize) -> Result<Self, EncodingError> {
        let mut assigner = SysVAssigner::new();
        let params = params
            .iter()
            .map(|&kind| {
                let mut assignment = CCAssignment::new(kind);
                assigner.assign_arg(&mut assignment);
                assignment
            })
            .collect::<Vec<_>>();

        Ok(Self {
            encoder: X64Encoder::new()?,
            frame: FunctionFrame::new(arena, params.len(), temp_slots),
            params,
            pushed: 0,
        })
    }

    /// Generate the function prologue.
    ///
    /// After the standard frame setup every parameter is copied to its home
    /// slot, so the argument registers are free for allocation.
    pub fn emit_prologue(&mut self) -> Result<(), EncodingError> {
        self.encoder
            .emit_prologue(&SysVAssigner::CALLEE_SAVED, self.frame.frame_size())?;

        for (index, param) in self.params.iter().enumerate() {
            let Some(home) = self.frame.param_home(index) else {
                continue;
            };
            match (param.reg, param.stack_off) {
                (Some(reg), _) => self.encoder.mov_mem_reg(AsmReg::RBP, home, reg)?,
                (None, Some(offset)) => {
                    // Incoming stack arguments sit above the return address and saved rbp.
                    let scratch = SysVAssigner::SCRATCH_GP;
                    self.encoder.mov_reg_mem(scratch, AsmReg::RBP, 16 + offset)?;
                    self.encoder.mov_mem_reg(AsmReg::RBP, home, scratch)?;
                }
                (None, None) => {}
            }
        }
        log::trace!(
            "prologue: {} parameters homed, frame size {}",
            self.params.len(),
            self.frame.frame_size()
        );
        Ok(())
    }

    /// Move the result into the return register and emit the epilogue.
    pub fn emit_epilogue(&mut self, result: Location, kind: ValueKind) -> Result<(), EncodingError> {
        debug_assert_eq!(self.pushed, 0, "unbalanced register saves at function exit");
        parallel_move::load(&mut self.encoder, SysVAssigner::return_register(kind), result)?;
        self.encoder.emit_epilogue(&SysVAssigner::CALLEE_SAVED)
    }

    /// Frame-pointer offset of parameter `index`.
    pub fn param_home(&self, index: usize) -> Option<i32> {
        self.frame.param_home(index)
    }

    pub fn allocate_slot(&mut self) -> Option<i32> {
        self.frame.allocate_slot()
    }

    pub fn free_slot(&mut self, offset: i32) {
        self.frame.free_slot(offset)
    }

    /// Emit code to spill a register to a frame slot.
    pub fn emit_spill(&mut self, reg: AsmReg, offset: i32) -> Result<(), EncodingError> {
        self.encoder.mov_mem_reg(AsmReg::RBP, offset, reg)
    }

    /// Save a register on the stack for the duration of a call.
    pub fn save_register(&mut self, reg: AsmReg) -> Result<(), EncodingError> {
        match reg.bank {
            RegBank::GeneralPurpose => self.encoder.push_reg(reg)?,
            RegBank::Xmm => {
                self.encoder.sub_reg_imm(AsmReg::RSP, 8)?;
                self.encoder.mov_mem_reg(AsmReg::RSP, 0, reg)?;
            }
        }
        self.pushed += 8;
        Ok(())
    }

    /// Undo [`FunctionCodegen::save_register`].
    pub fn restore_register(&mut self, reg: AsmReg) -> Result<(), EncodingError> {
        match reg.bank {
            RegBank::GeneralPurpose => self.encoder.pop_reg(reg)?,
            RegBank::Xmm => {
                self.encoder.mov_reg_mem(reg, AsmReg::RSP, 0)?;
                self.encoder.add_reg_imm(AsmReg::RSP, 8)?;
            }
        }
        self.pushed -= 8;
        Ok(())
    }

    /// Padding needed so that rsp is 16-byte aligned after reserving
    /// `outgoing` bytes of stack arguments.
    pub fn call_padding(&self, outgoing: u32) -> u32 {
        (self.pushed + outgoing) % 16
    }

    /// Reserve stack below the saved registers, e.g. for outgoing arguments.
    pub fn reserve_stack(&mut self, bytes: u32) -> Result<(), EncodingError> {
        if bytes > 0 {
            self.encoder.sub_reg_imm(AsmReg::RSP, bytes as i32)?;
            self.pushed += bytes;
        }
        Ok(())
    }

    pub fn release_stack(&mut self, bytes: u32) -> Result<(), EncodingError> {
        if bytes > 0 {
            self.encoder.add_reg_imm(AsmReg::RSP, bytes as i32)?;
            self.pushed -= bytes;
        }
        Ok(())
    }

    /// Get access to the underlying encoder for instruction emission.
    pub fn encoder_mut(&mut self) -> &mut X64Encoder {
        &mut self.encoder
    }

    pub fn instruction_count(&self) -> usize {
        self.encoder.instruction_count()
    }

    /// Finalize code generation and return machine code.
    pub fn finalize(mut self) -> Result<Vec<u8>, EncodingError> {
        self.encoder.finalize()
    }
}
