// This module is the instruction emitter of the expression-tree compiler. X64Encoder wraps the
// iced-x86 CodeAssembler and converts AsmReg register references into real x86-64 machine code.
// It covers exactly what tree code generation and call staging request: 64-bit moves between
// registers, frame slots and immediates, integer arithmetic (ADD, SUB, IMUL) with register,
// immediate and memory operands, MOVQ transfers for the XMM bank, PUSH/POP for saving
// registers around calls, indirect CALL through a register, stack pointer adjustment and the
// prologue/epilogue of a generated function. The emitter never decides anything about
// registers itself; it only reports errors for operand combinations it cannot encode.

//! x86-64 instruction encoding using iced-x86.

use iced_x86::code_asm::*;
use iced_x86::IcedError;
use thiserror::Error;

use crate::core::register_file::{AsmReg, RegBank};

/// Error types for instruction encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Register is not valid for the requested operation.
    #[error("invalid register {0} for operation")]
    InvalidRegister(AsmReg),
    /// Assembly error from iced-x86.
    #[error("assembly error: {0}")]
    AssemblyError(String),
}

impl From<IcedError> for EncodingError {
    fn from(err: IcedError) -> Self {
        EncodingError::AssemblyError(err.to_string())
    }
}

/// Integer arithmetic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

impl ArithOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "imul",
        }
    }
}

/// x86-64 instruction encoder using iced-x86.
pub struct X64Encoder {
    /// Code assembler for generating instructions.
    assembler: CodeAssembler,
}

impl X64Encoder {
    pub fn new() -> Result<Self, EncodingError> {
        Ok(Self {
            assembler: CodeAssembler::new(64)?,
        })
    }

    /// Convert AsmReg to iced-x86 64-bit GP register.
    fn to_gp64_register(&self, reg: AsmReg) -> Result<AsmRegister64, EncodingError> {
        if reg.bank != RegBank::GeneralPurpose {
            return Err(EncodingError::InvalidRegister(reg));
        }

        const GP64_REGS: [AsmRegister64; 16] = [
            rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi,
            r8, r9, r10, r11, r12, r13, r14, r15,
        ];

        GP64_REGS
            .get(reg.id as usize)
            .copied()
            .ok_or(EncodingError::InvalidRegister(reg))
    }

    /// Convert AsmReg to iced-x86 XMM register.
    fn to_xmm_register(&self, reg: AsmReg) -> Result<AsmRegisterXmm, EncodingError> {
        if reg.bank != RegBank::Xmm {
            return Err(EncodingError::InvalidRegister(reg));
        }

        const XMM_REGS: [AsmRegisterXmm; 16] = [
            xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7,
            xmm8, xmm9, xmm10, xmm11, xmm12, xmm13, xmm14, xmm15,
        ];

        XMM_REGS
            .get(reg.id as usize)
            .copied()
            .ok_or(EncodingError::InvalidRegister(reg))
    }

    fn frame_operand(&self, base: AsmReg, offset: i32) -> Result<AsmMemoryOperand, EncodingError> {
        let base_reg = self.to_gp64_register(base)?;
        Ok(qword_ptr(base_reg + offset))
    }

    /// Register to register move within a bank.
    pub fn mov_reg_reg(&mut self, dst: AsmReg, src: AsmReg) -> Result<(), EncodingError> {
        if dst == src {
            return Ok(());
        }
        match (dst.bank, src.bank) {
            (RegBank::GeneralPurpose, RegBank::GeneralPurpose) => {
                let dst_reg = self.to_gp64_register(dst)?;
                let src_reg = self.to_gp64_register(src)?;
                self.assembler.mov(dst_reg, src_reg)?;
            }
            (RegBank::Xmm, RegBank::Xmm) => {
                let dst_reg = self.to_xmm_register(dst)?;
                let src_reg = self.to_xmm_register(src)?;
                self.assembler.movq(dst_reg, src_reg)?;
            }
            (RegBank::Xmm, RegBank::GeneralPurpose) => {
                let dst_reg = self.to_xmm_register(dst)?;
                let src_reg = self.to_gp64_register(src)?;
                self.assembler.movq(dst_reg, src_reg)?;
            }
            (RegBank::GeneralPurpose, RegBank::Xmm) => {
                let dst_reg = self.to_gp64_register(dst)?;
                let src_reg = self.to_xmm_register(src)?;
                self.assembler.movq(dst_reg, src_reg)?;
            }
        }
        Ok(())
    }

    /// Load a 64-bit immediate into a GP register.
    pub fn mov_reg_imm(&mut self, dst: AsmReg, imm: u64) -> Result<(), EncodingError> {
        let dst_reg = self.to_gp64_register(dst)?;
        self.assembler.mov(dst_reg, imm as i64)?;
        Ok(())
    }

    /// Load 8 bytes from `[base + offset]` into a register of either bank.
    pub fn mov_reg_mem(&mut self, dst: AsmReg, base: AsmReg, offset: i32) -> Result<(), EncodingError> {
        let mem = self.frame_operand(base, offset)?;
        match dst.bank {
            RegBank::GeneralPurpose => {
                let dst_reg = self.to_gp64_register(dst)?;
                self.assembler.mov(dst_reg, mem)?;
            }
            RegBank::Xmm => {
                let dst_reg = self.to_xmm_register(dst)?;
                self.assembler.movq(dst_reg, mem)?;
            }
        }
        Ok(())
    }

    /// Store 8 bytes from a register of either bank to `[base + offset]`.
    pub fn mov_mem_reg(&mut self, base: AsmReg, offset: i32, src: AsmReg) -> Result<(), EncodingError> {
        let mem = self.frame_operand(base, offset)?;
        match src.bank {
            RegBank::GeneralPurpose => {
                let src_reg = self.to_gp64_register(src)?;
                self.assembler.mov(mem, src_reg)?;
            }
            RegBank::Xmm => {
                let src_reg = self.to_xmm_register(src)?;
                self.assembler.movq(mem, src_reg)?;
            }
        }
        Ok(())
    }

    /// `dst = dst op src`.
    pub fn arith_reg_reg(&mut self, op: ArithOp, dst: AsmReg, src: AsmReg) -> Result<(), EncodingError> {
        let dst_reg = self.to_gp64_register(dst)?;
        let src_reg = self.to_gp64_register(src)?;
        match op {
            ArithOp::Add => self.assembler.add(dst_reg, src_reg)?,
            ArithOp::Sub => self.assembler.sub(dst_reg, src_reg)?,
            ArithOp::Mul => self.assembler.imul_2(dst_reg, src_reg)?,
        }
        Ok(())
    }

    /// `dst = dst op imm`, with `imm` sign-extended from 32 bits.
    pub fn arith_reg_imm(&mut self, op: ArithOp, dst: AsmReg, imm: i32) -> Result<(), EncodingError> {
        let dst_reg = self.to_gp64_register(dst)?;
        match op {
            ArithOp::Add => self.assembler.add(dst_reg, imm)?,
            ArithOp::Sub => self.assembler.sub(dst_reg, imm)?,
            ArithOp::Mul => self.assembler.imul_3(dst_reg, dst_reg, imm)?,
        }
        Ok(())
    }

    /// `dst = dst op [base + offset]`.
    pub fn arith_reg_mem(
        &mut self,
        op: ArithOp,
        dst: AsmReg,
        base: AsmReg,
        offset: i32,
    ) -> Result<(), EncodingError> {
        let dst_reg = self.to_gp64_register(dst)?;
        let mem = self.frame_operand(base, offset)?;
        match op {
            ArithOp::Add => self.assembler.add(dst_reg, mem)?,
            ArithOp::Sub => self.assembler.sub(dst_reg, mem)?,
            ArithOp::Mul => self.assembler.imul_2(dst_reg, mem)?,
        }
        Ok(())
    }

    /// Add an immediate to a GP register (used for rsp adjustment).
    pub fn add_reg_imm(&mut self, dst: AsmReg, imm: i32) -> Result<(), EncodingError> {
        self.arith_reg_imm(ArithOp::Add, dst, imm)
    }

    /// Subtract an immediate from a GP register (used for rsp adjustment).
    pub fn sub_reg_imm(&mut self, dst: AsmReg, imm: i32) -> Result<(), EncodingError> {
        self.arith_reg_imm(ArithOp::Sub, dst, imm)
    }

    /// Emit LEA `dst = base + offset`.
    pub fn lea(&mut self, dst: AsmReg, base: AsmReg, offset: i32) -> Result<(), EncodingError> {
        let dst_reg = self.to_gp64_register(dst)?;
        let base_reg = self.to_gp64_register(base)?;
        self.assembler.lea(dst_reg, qword_ptr(base_reg + offset))?;
        Ok(())
    }

    /// Emit PUSH instruction.
    pub fn push_reg(&mut self, reg: AsmReg) -> Result<(), EncodingError> {
        let src_reg = self.to_gp64_register(reg)?;
        self.assembler.push(src_reg)?;
        Ok(())
    }

    /// Emit POP instruction.
    pub fn pop_reg(&mut self, reg: AsmReg) -> Result<(), EncodingError> {
        let dst_reg = self.to_gp64_register(reg)?;
        self.assembler.pop(dst_reg)?;
        Ok(())
    }

    /// Emit CALL instruction to register.
    pub fn call_reg(&mut self, reg: AsmReg) -> Result<(), EncodingError> {
        let target_reg = self.to_gp64_register(reg)?;
        self.assembler.call(target_reg)?;
        Ok(())
    }

    /// Emit RET instruction.
    pub fn ret(&mut self) -> Result<(), EncodingError> {
        self.assembler.ret()?;
        Ok(())
    }

    /// Generate prologue: establish rbp, save `callee_saved`, reserve `frame_size` bytes.
    pub fn emit_prologue(&mut self, callee_saved: &[AsmReg], frame_size: u32) -> Result<(), EncodingError> {
        self.push_reg(AsmReg::RBP)?;
        self.mov_reg_reg(AsmReg::RBP, AsmReg::RSP)?;
        for &reg in callee_saved {
            self.push_reg(reg)?;
        }
        if frame_size > 0 {
            self.sub_reg_imm(AsmReg::RSP, frame_size as i32)?;
        }
        Ok(())
    }

    /// Generate epilogue matching [`X64Encoder::emit_prologue`].
    pub fn emit_epilogue(&mut self, callee_saved: &[AsmReg]) -> Result<(), EncodingError> {
        let saved_area = 8 * callee_saved.len() as i32;
        self.lea(AsmReg::RSP, AsmReg::RBP, -saved_area)?;
        for &reg in callee_saved.iter().rev() {
            self.pop_reg(reg)?;
        }
        self.pop_reg(AsmReg::RBP)?;
        self.ret()
    }

    /// Number of instructions emitted so far.
    pub fn instruction_count(&self) -> usize {
        self.assembler.instructions().len()
    }

    /// Assemble the emitted instructions. The code contains no
    /// IP-relative references, so it can be placed at any address.
    pub fn finalize(&mut self) -> Result<Vec<u8>, EncodingError> {
        Ok(self.assembler.assemble(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_instructions() {
        let mut encoder = X64Encoder::new().unwrap();

        encoder.mov_reg_reg(AsmReg::RAX, AsmReg::RCX).unwrap();
        encoder.arith_reg_reg(ArithOp::Add, AsmReg::RAX, AsmReg::RDX).unwrap();
        encoder.mov_reg_imm(AsmReg::RAX, 42).unwrap();
        encoder.ret().unwrap();

        assert_eq!(encoder.instruction_count(), 4);
        let code = encoder.finalize().unwrap();
        assert!(!code.is_empty());
        assert_eq!(*code.last().unwrap(), 0xC3);
    }

    #[test]
    fn test_self_move_is_elided() {
        let mut encoder = X64Encoder::new().unwrap();
        encoder.mov_reg_reg(AsmReg::RBX, AsmReg::RBX).unwrap();
        assert_eq!(encoder.instruction_count(), 0);
    }

    #[test]
    fn test_xmm_transfers() {
        let mut encoder = X64Encoder::new().unwrap();
        // Not `xmm1`: that name is an iced-x86 register constant here.
        let float_reg = AsmReg::xmm(1);

        encoder.mov_reg_reg(float_reg, AsmReg::R11).unwrap();
        encoder.mov_reg_reg(AsmReg::RAX, float_reg).unwrap();
        encoder.mov_reg_reg(AsmReg::XMM0, float_reg).unwrap();
        encoder.mov_mem_reg(AsmReg::RBP, -8, float_reg).unwrap();
        encoder.mov_reg_mem(float_reg, AsmReg::RSP, 16).unwrap();
        assert_eq!(encoder.instruction_count(), 5);
        assert!(!encoder.finalize().unwrap().is_empty());
    }

    #[test]
    fn test_bank_mismatch_is_rejected() {
        let mut encoder = X64Encoder::new().unwrap();
        assert_eq!(
            encoder.push_reg(AsmReg::XMM0),
            Err(EncodingError::InvalidRegister(AsmReg::XMM0))
        );
        assert_eq!(
            encoder.arith_reg_reg(ArithOp::Mul, AsmReg::RAX, AsmReg::xmm(2)),
            Err(EncodingError::InvalidRegister(AsmReg::xmm(2)))
        );
    }

    #[test]
    fn test_prologue_epilogue() {
        let mut encoder = X64Encoder::new().unwrap();
        let saved = [AsmReg::RBX, AsmReg::R12];

        encoder.emit_prologue(&saved, 24).unwrap();
        encoder.emit_epilogue(&saved).unwrap();

        // push rbp, mov, 2 pushes, sub | lea, 2 pops, pop rbp, ret
        assert_eq!(encoder.instruction_count(), 10);
        let code = encoder.finalize().unwrap();
        assert_eq!(code[0], 0x55);
    }
}
