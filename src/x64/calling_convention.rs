// This module implements the System V AMD64 calling convention used both for calls the
// generated code makes to native functions and for the generated function itself. It
// provides the CCAssigner trait and the SysVAssigner implementation: GP arguments pass in
// RDI, RSI, RDX, RCX, R8, R9, FP arguments in XMM0-XMM7, remaining arguments go on the stack
// in 8-byte slots, return values use RAX or XMM0, and RBX, R12-R15 are callee-saved while
// every other allocatable register may be clobbered by a callee. FunctionFrame describes the
// stack layout of a generated function: saved callee-saved registers, parameter homes and a
// pool of temporary slots for values parked under register pressure.

//! System V x86-64 calling convention implementation.

use bumpalo::{collections::Vec as BumpVec, Bump};

use crate::core::register_file::{AsmReg, RegBank, RegBitSet};
use crate::core::types::ValueKind;

/// Argument or return value placement chosen by the calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CCAssignment {
    pub kind: ValueKind,
    /// Assigned register (if any).
    pub reg: Option<AsmReg>,
    /// Offset from the stack pointer at the call (if assigned to stack).
    pub stack_off: Option<i32>,
}

impl CCAssignment {
    pub fn new(kind: ValueKind) -> Self {
        Self { kind, reg: None, stack_off: None }
    }
}

/// Register classes of a calling convention.
#[derive(Debug, Clone)]
pub struct CCInfo {
    /// Registers a callee may overwrite.
    pub caller_saved_regs: RegBitSet,
}

/// Trait for calling convention argument assignment.
pub trait CCAssigner {
    fn get_ccinfo(&self) -> &CCInfo;

    /// Assign the next argument.
    fn assign_arg(&mut self, arg: &mut CCAssignment);

    /// Stack space needed for the arguments assigned so far.
    fn get_stack_size(&self) -> u32;
}

/// System V x86-64 calling convention assigner.
pub struct SysVAssigner {
    cc_info: CCInfo,
    /// Current GP argument register index.
    gp_cnt: usize,
    /// Current XMM argument register index.
    xmm_cnt: usize,
    /// Current stack offset for arguments.
    stack: u32,
}

impl Default for SysVAssigner {
    fn default() -> Self {
        let callee_saved = RegBitSet::from_regs(&Self::CALLEE_SAVED);

        let mut caller_saved = RegBitSet::all_in_bank(RegBank::GeneralPurpose);
        caller_saved.union(&RegBitSet::all_in_bank(RegBank::Xmm));
        caller_saved.subtract(&callee_saved);
        caller_saved.clear(AsmReg::RSP);
        caller_saved.clear(AsmReg::RBP);

        Self {
            cc_info: CCInfo {
                caller_saved_regs: caller_saved,
            },
            gp_cnt: 0,
            xmm_cnt: 0,
            stack: 0,
        }
    }
}

impl SysVAssigner {
    /// GP argument registers.
    pub const GP_ARG_REGS: [AsmReg; 6] = [
        AsmReg::RDI,
        AsmReg::RSI,
        AsmReg::RDX,
        AsmReg::RCX,
        AsmReg::R8,
        AsmReg::R9,
    ];

    /// XMM argument registers.
    pub const XMM_ARG_REGS: [AsmReg; 8] = [
        AsmReg::xmm(0),
        AsmReg::xmm(1),
        AsmReg::xmm(2),
        AsmReg::xmm(3),
        AsmReg::xmm(4),
        AsmReg::xmm(5),
        AsmReg::xmm(6),
        AsmReg::xmm(7),
    ];

    pub const RET_GP_REG: AsmReg = AsmReg::RAX;
    pub const RET_XMM_REG: AsmReg = AsmReg::XMM0;

    /// Callee-saved GP registers, in prologue push order.
    pub const CALLEE_SAVED: [AsmReg; 5] = [
        AsmReg::RBX,
        AsmReg::R12,
        AsmReg::R13,
        AsmReg::R14,
        AsmReg::R15,
    ];

    /// Scratch GP register, never allocated: used for cycle breaking,
    /// memory-to-memory moves and loading float immediates.
    pub const SCRATCH_GP: AsmReg = AsmReg::R11;

    /// Scratch XMM register, never allocated.
    pub const SCRATCH_XMM: AsmReg = AsmReg::XMM15;

    /// Register holding the call target. Not an argument register.
    pub const CALL_TARGET: AsmReg = AsmReg::RAX;

    /// GP registers in allocation order (everything except RSP, RBP, R11).
    pub const GP_ALLOCATION_ORDER: [AsmReg; 13] = [
        AsmReg::RAX,
        AsmReg::RCX,
        AsmReg::RDX,
        AsmReg::RBX,
        AsmReg::RSI,
        AsmReg::RDI,
        AsmReg::R8,
        AsmReg::R9,
        AsmReg::R10,
        AsmReg::R12,
        AsmReg::R13,
        AsmReg::R14,
        AsmReg::R15,
    ];

    /// XMM registers in allocation order (everything except XMM15).
    pub const XMM_ALLOCATION_ORDER: [AsmReg; 15] = [
        AsmReg::xmm(0),
        AsmReg::xmm(1),
        AsmReg::xmm(2),
        AsmReg::xmm(3),
        AsmReg::xmm(4),
        AsmReg::xmm(5),
        AsmReg::xmm(6),
        AsmReg::xmm(7),
        AsmReg::xmm(8),
        AsmReg::xmm(9),
        AsmReg::xmm(10),
        AsmReg::xmm(11),
        AsmReg::xmm(12),
        AsmReg::xmm(13),
        AsmReg::xmm(14),
    ];

    pub fn new() -> Self {
        Self::default()
    }

    /// Return register for a value kind.
    pub fn return_register(kind: ValueKind) -> AsmReg {
        match kind.bank() {
            RegBank::GeneralPurpose => Self::RET_GP_REG,
            RegBank::Xmm => Self::RET_XMM_REG,
        }
    }

    /// Align a value up to the specified alignment.
    fn align_up(value: u32, align: u32) -> u32 {
        (value + align - 1) & !(align - 1)
    }
}

impl CCAssigner for SysVAssigner {
    fn get_ccinfo(&self) -> &CCInfo {
        &self.cc_info
    }

    fn assign_arg(&mut self, arg: &mut CCAssignment) {
        let next = match arg.kind.bank() {
            RegBank::GeneralPurpose => {
                let reg = Self::GP_ARG_REGS.get(self.gp_cnt).copied();
                if reg.is_some() {
                    self.gp_cnt += 1;
                }
                reg
            }
            RegBank::Xmm => {
                let reg = Self::XMM_ARG_REGS.get(self.xmm_cnt).copied();
                if reg.is_some() {
                    self.xmm_cnt += 1;
                }
                reg
            }
        };

        match next {
            Some(reg) => arg.reg = Some(reg),
            None => {
                // Each stack slot is 8 bytes, whatever the value size.
                self.stack = Self::align_up(self.stack, 8);
                arg.stack_off = Some(self.stack as i32);
                self.stack += 8;
            }
        }
    }

    fn get_stack_size(&self) -> u32 {
        Self::align_up(self.stack, 16)
    }
}

/// Stack frame of a generated function.
///
/// ```text
/// rbp + 8:   return address
/// rbp:       saved rbp
/// rbp - 8:   saved rbx, r12, r13, r14, r15 (down to rbp - 40)
/// below:     parameter homes, then temporary slots
/// ```
#[derive(Debug)]
pub struct FunctionFrame<'a> {
    /// Offsets of parameter homes, by parameter index.
    param_homes: BumpVec<'a, i32>,
    /// Temporary slots not currently in use.
    free_slots: BumpVec<'a, i32>,
    /// Bytes subtracted from rsp after the callee-saved pushes.
    frame_size: u32,
}

impl<'a> FunctionFrame<'a> {
    const SAVED_AREA: i32 = 8 * SysVAssigner::CALLEE_SAVED.len() as i32;

    pub fn new(arena: &'a Bump, param_count: usize, temp_slots: usize) -> Self {
        let mut param_homes = BumpVec::with_capacity_in(param_count, arena);
        for i in 0..param_count {
            param_homes.push(-Self::SAVED_AREA - 8 * (i as i32 + 1));
        }

        // Lowest-addressed slot is handed out last.
        let mut free_slots = BumpVec::with_capacity_in(temp_slots, arena);
        for i in (0..temp_slots).rev() {
            free_slots.push(-Self::SAVED_AREA - 8 * ((param_count + i) as i32 + 1));
        }

        // At entry rsp is 8 mod 16; after pushing rbp and five registers it is
        // 8 mod 16 again, so the body area must be 8 mod 16 to realign.
        let body = 8 * (param_count + temp_slots) as u32;
        let frame_size = if body % 16 == 8 { body } else { body + 8 };

        Self {
            param_homes,
            free_slots,
            frame_size,
        }
    }

    /// Frame-pointer offset where parameter `index` is stored.
    pub fn param_home(&self, index: usize) -> Option<i32> {
        self.param_homes.get(index).copied()
    }

    /// Take a free temporary slot.
    pub fn allocate_slot(&mut self) -> Option<i32> {
        self.free_slots.pop()
    }

    /// Return a temporary slot.
    pub fn free_slot(&mut self, offset: i32) {
        debug_assert!(!self.free_slots.contains(&offset), "slot {offset} freed twice");
        self.free_slots.push(offset);
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;

    #[test]
    fn test_sysv_gp_argument_assignment() {
        let mut assigner = SysVAssigner::new();

        for i in 0..6 {
            let mut arg = CCAssignment::new(ValueKind::I64);
            assigner.assign_arg(&mut arg);
            assert_eq!(arg.reg, Some(SysVAssigner::GP_ARG_REGS[i]));
            assert!(arg.stack_off.is_none());
        }

        let mut arg7 = CCAssignment::new(ValueKind::I32);
        assigner.assign_arg(&mut arg7);
        assert!(arg7.reg.is_none());
        assert_eq!(arg7.stack_off, Some(0));

        let mut arg8 = CCAssignment::new(ValueKind::Ptr);
        assigner.assign_arg(&mut arg8);
        assert_eq!(arg8.stack_off, Some(8));
        assert_eq!(assigner.get_stack_size(), 16);
    }

    #[test]
    fn test_sysv_mixed_banks_count_independently() {
        let mut assigner = SysVAssigner::new();
        let kinds = [ValueKind::F64, ValueKind::I32, ValueKind::F32, ValueKind::I64];
        let regs: Vec<_> = kinds
            .iter()
            .map(|&kind| {
                let mut arg = CCAssignment::new(kind);
                assigner.assign_arg(&mut arg);
                arg.reg.unwrap()
            })
            .collect();
        assert_eq!(regs, vec![AsmReg::xmm(0), AsmReg::RDI, AsmReg::xmm(1), AsmReg::RSI]);
        assert_eq!(assigner.get_stack_size(), 0);
    }

    #[test]
    fn test_sysv_return_registers() {
        assert_eq!(SysVAssigner::return_register(ValueKind::I32), AsmReg::RAX);
        assert_eq!(SysVAssigner::return_register(ValueKind::Ptr), AsmReg::RAX);
        assert_eq!(SysVAssigner::return_register(ValueKind::F64), AsmReg::XMM0);
    }

    #[test]
    fn test_register_classes() {
        let assigner = SysVAssigner::new();
        let info = assigner.get_ccinfo();

        assert!(!info.caller_saved_regs.contains(AsmReg::RBX));
        assert!(!info.caller_saved_regs.contains(AsmReg::R12));
        assert!(info.caller_saved_regs.contains(AsmReg::RAX));
        assert!(info.caller_saved_regs.contains(AsmReg::R10));
        assert!(info.caller_saved_regs.contains(AsmReg::xmm(9)));
        assert!(!info.caller_saved_regs.contains(AsmReg::RSP));
    }

    #[test]
    fn test_function_frame_layout() {
        let arena = Bump::new();
        let mut frame = FunctionFrame::new(&arena, 2, 3);

        assert_eq!(frame.param_home(0), Some(-48));
        assert_eq!(frame.param_home(1), Some(-56));
        assert_eq!(frame.param_home(2), None);

        let slot1 = frame.allocate_slot().unwrap();
        let slot2 = frame.allocate_slot().unwrap();
        assert_eq!(slot1, -64);
        assert_eq!(slot2, -72);

        frame.free_slot(slot1);
        assert_eq!(frame.allocate_slot(), Some(slot1));
        assert_eq!(frame.allocate_slot(), Some(-80));
        assert_eq!(frame.allocate_slot(), None);

        // Return address, rbp, five saved registers and the body keep rsp aligned.
        assert_eq!((frame.frame_size() + 56) % 16, 0);
        assert!(frame.frame_size() >= 8 * 5);
    }

    #[test]
    fn test_function_frame_without_slots() {
        let arena = Bump::new();
        let mut frame = FunctionFrame::new(&arena, 0, 0);
        assert_eq!(frame.allocate_slot(), None);
        assert_eq!(frame.frame_size(), 8);
    }
}
