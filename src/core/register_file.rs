//! Register pool management.
//!
//! This module implements the RegisterFile that hands out registers to the
//! values produced while generating code for an expression tree. Registers are
//! tracked per bank with bitsets; every allocation records the node that owns
//! the register until it is explicitly freed. There is no eviction: when a bank
//! runs dry the caller either parks a value in a stack slot or reports
//! exhaustion.

use std::fmt;

use thiserror::Error;

use super::types::NodeId;

/// Number of register banks (GP and XMM).
pub const NUM_BANKS: usize = 2;

/// Number of registers per bank.
pub const REGISTERS_PER_BANK: usize = 16;

/// Register banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegBank {
    GeneralPurpose = 0,
    Xmm = 1,
}

impl RegBank {
    pub const ALL: [RegBank; NUM_BANKS] = [RegBank::GeneralPurpose, RegBank::Xmm];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RegBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegBank::GeneralPurpose => f.write_str("general-purpose"),
            RegBank::Xmm => f.write_str("xmm"),
        }
    }
}

/// A machine register: bank plus hardware encoding number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: u8,
}

impl AsmReg {
    pub const RAX: AsmReg = AsmReg::gp(0);
    pub const RCX: AsmReg = AsmReg::gp(1);
    pub const RDX: AsmReg = AsmReg::gp(2);
    pub const RBX: AsmReg = AsmReg::gp(3);
    pub const RSP: AsmReg = AsmReg::gp(4);
    pub const RBP: AsmReg = AsmReg::gp(5);
    pub const RSI: AsmReg = AsmReg::gp(6);
    pub const RDI: AsmReg = AsmReg::gp(7);
    pub const R8: AsmReg = AsmReg::gp(8);
    pub const R9: AsmReg = AsmReg::gp(9);
    pub const R10: AsmReg = AsmReg::gp(10);
    pub const R11: AsmReg = AsmReg::gp(11);
    pub const R12: AsmReg = AsmReg::gp(12);
    pub const R13: AsmReg = AsmReg::gp(13);
    pub const R14: AsmReg = AsmReg::gp(14);
    pub const R15: AsmReg = AsmReg::gp(15);
    pub const XMM0: AsmReg = AsmReg::xmm(0);
    pub const XMM15: AsmReg = AsmReg::xmm(15);

    pub const fn gp(id: u8) -> Self {
        Self { bank: RegBank::GeneralPurpose, id }
    }

    pub const fn xmm(id: u8) -> Self {
        Self { bank: RegBank::Xmm, id }
    }

    /// Linear register index for array indexing.
    pub fn linear_index(&self) -> usize {
        self.bank.index() * REGISTERS_PER_BANK + self.id as usize
    }

    pub fn name(&self) -> &'static str {
        const GP_NAMES: [&str; REGISTERS_PER_BANK] = [
            "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi",
            "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
        ];
        const XMM_NAMES: [&str; REGISTERS_PER_BANK] = [
            "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7",
            "xmm8", "xmm9", "xmm10", "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
        ];
        let names = match self.bank {
            RegBank::GeneralPurpose => &GP_NAMES,
            RegBank::Xmm => &XMM_NAMES,
        };
        names.get(self.id as usize).copied().unwrap_or("?")
    }
}

impl fmt::Display for AsmReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bit set for efficiently tracking register sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegBitSet {
    banks: [u64; NUM_BANKS],
}

impl RegBitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set holding exactly the given registers.
    pub fn from_regs(regs: &[AsmReg]) -> Self {
        let mut set = Self::new();
        for &reg in regs {
            set.set(reg);
        }
        set
    }

    /// Create register set with every register of a bank marked.
    pub fn all_in_bank(bank: RegBank) -> Self {
        let mut set = Self::new();
        set.banks[bank.index()] = (1u64 << REGISTERS_PER_BANK) - 1;
        set
    }

    pub fn contains(&self, reg: AsmReg) -> bool {
        (reg.id as usize) < REGISTERS_PER_BANK && (self.banks[reg.bank.index()] & (1u64 << reg.id)) != 0
    }

    pub fn set(&mut self, reg: AsmReg) {
        if (reg.id as usize) < REGISTERS_PER_BANK {
            self.banks[reg.bank.index()] |= 1u64 << reg.id;
        }
    }

    pub fn clear(&mut self, reg: AsmReg) {
        if (reg.id as usize) < REGISTERS_PER_BANK {
            self.banks[reg.bank.index()] &= !(1u64 << reg.id);
        }
    }

    /// Set union with another set.
    pub fn union(&mut self, other: &RegBitSet) {
        for i in 0..NUM_BANKS {
            self.banks[i] |= other.banks[i];
        }
    }

    /// Set intersection with another set.
    pub fn intersect(&mut self, other: &RegBitSet) {
        for i in 0..NUM_BANKS {
            self.banks[i] &= other.banks[i];
        }
    }

    /// Remove every register of `other` from this set.
    pub fn subtract(&mut self, other: &RegBitSet) {
        for i in 0..NUM_BANKS {
            self.banks[i] &= !other.banks[i];
        }
    }

    /// Find the lowest-numbered register of a bank in this set.
    pub fn first_in_bank(&self, bank: RegBank) -> Option<AsmReg> {
        let bits = self.banks[bank.index()];
        if bits == 0 {
            return None;
        }
        Some(AsmReg { bank, id: bits.trailing_zeros() as u8 })
    }

    pub fn count_in_bank(&self, bank: RegBank) -> u32 {
        self.banks[bank.index()].count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.iter().all(|&bits| bits == 0)
    }

    /// Iterate members of one bank in ascending register number.
    pub fn iter_bank(&self, bank: RegBank) -> impl Iterator<Item = AsmReg> + '_ {
        let bits = self.banks[bank.index()];
        (0..REGISTERS_PER_BANK as u8)
            .filter(move |id| bits & (1u64 << id) != 0)
            .map(move |id| AsmReg { bank, id })
    }

    /// Iterate all members, GP bank first.
    pub fn iter(&self) -> impl Iterator<Item = AsmReg> + '_ {
        RegBank::ALL.into_iter().flat_map(move |bank| self.iter_bank(bank))
    }
}

/// Error types for register allocation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegAllocError {
    #[error("no {0} registers available")]
    NoRegistersAvailable(RegBank),
    #[error("register {0} is not allocated")]
    RegisterNotAllocated(AsmReg),
    #[error("register {0} is already allocated")]
    RegisterInUse(AsmReg),
    #[error("register {0} is not allocatable")]
    InvalidRegister(AsmReg),
}

/// RegisterFile manages the register pool for one compilation.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    /// Registers available for allocation.
    allocatable: RegBitSet,
    /// Currently allocated registers.
    used: RegBitSet,
    /// Which node owns each register, if any.
    owners: [Option<NodeId>; NUM_BANKS * REGISTERS_PER_BANK],
    /// Most registers simultaneously live, per bank.
    high_water: [u32; NUM_BANKS],
    /// Total number of successful allocations.
    allocations: usize,
}

impl RegisterFile {
    pub fn new(allocatable: RegBitSet) -> Self {
        Self {
            allocatable,
            used: RegBitSet::new(),
            owners: [None; NUM_BANKS * REGISTERS_PER_BANK],
            high_water: [0; NUM_BANKS],
            allocations: 0,
        }
    }

    /// Allocate a register from `bank`.
    ///
    /// The hint is taken when it is free and allocatable; otherwise the
    /// lowest-numbered free register outside `exclude` is chosen.
    pub fn allocate(
        &mut self,
        bank: RegBank,
        owner: Option<NodeId>,
        hint: Option<AsmReg>,
        exclude: &RegBitSet,
    ) -> Result<AsmReg, RegAllocError> {
        if let Some(hint) = hint {
            if hint.bank == bank && self.is_free(hint) && !exclude.contains(hint) {
                self.assign(hint, owner);
                return Ok(hint);
            }
        }

        let mut free = self.free_in_bank(bank);
        free.subtract(exclude);
        let reg = free
            .first_in_bank(bank)
            .ok_or(RegAllocError::NoRegistersAvailable(bank))?;
        self.assign(reg, owner);
        Ok(reg)
    }

    /// Allocate one particular register.
    pub fn allocate_specific(&mut self, reg: AsmReg, owner: Option<NodeId>) -> Result<(), RegAllocError> {
        if !self.allocatable.contains(reg) {
            return Err(RegAllocError::InvalidRegister(reg));
        }
        if self.used.contains(reg) {
            return Err(RegAllocError::RegisterInUse(reg));
        }
        self.assign(reg, owner);
        Ok(())
    }

    fn assign(&mut self, reg: AsmReg, owner: Option<NodeId>) {
        self.used.set(reg);
        self.owners[reg.linear_index()] = owner;
        self.allocations += 1;
        let bank = reg.bank.index();
        self.high_water[bank] = self.high_water[bank].max(self.used.count_in_bank(reg.bank));
    }

    /// Return a register to the pool.
    pub fn free_register(&mut self, reg: AsmReg) -> Result<(), RegAllocError> {
        if !self.used.contains(reg) {
            return Err(RegAllocError::RegisterNotAllocated(reg));
        }
        self.used.clear(reg);
        self.owners[reg.linear_index()] = None;
        Ok(())
    }

    /// Hand an allocated register over to a different owner.
    pub fn transfer(&mut self, reg: AsmReg, owner: Option<NodeId>) -> Result<(), RegAllocError> {
        if !self.used.contains(reg) {
            return Err(RegAllocError::RegisterNotAllocated(reg));
        }
        self.owners[reg.linear_index()] = owner;
        Ok(())
    }

    pub fn owner(&self, reg: AsmReg) -> Option<NodeId> {
        self.owners[reg.linear_index()]
    }

    pub fn is_allocated(&self, reg: AsmReg) -> bool {
        self.used.contains(reg)
    }

    pub fn is_free(&self, reg: AsmReg) -> bool {
        self.allocatable.contains(reg) && !self.used.contains(reg)
    }

    /// Registers currently holding live values.
    pub fn live(&self) -> RegBitSet {
        self.used
    }

    pub fn allocatable(&self) -> RegBitSet {
        self.allocatable
    }

    /// Free registers of one bank.
    pub fn free_in_bank(&self, bank: RegBank) -> RegBitSet {
        let mut free = self.allocatable;
        free.intersect(&RegBitSet::all_in_bank(bank));
        free.subtract(&self.used);
        free
    }

    pub fn free_count(&self, bank: RegBank) -> u32 {
        self.free_in_bank(bank).count_in_bank(bank)
    }

    /// Register usage for a bank as `(used, total)`.
    pub fn bank_usage(&self, bank: RegBank) -> (u32, u32) {
        (self.used.count_in_bank(bank), self.allocatable.count_in_bank(bank))
    }

    pub fn high_water(&self, bank: RegBank) -> u32 {
        self.high_water[bank.index()]
    }

    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Release every register, keeping the allocatable set.
    pub fn reset(&mut self) {
        self.used = RegBitSet::new();
        self.owners = [None; NUM_BANKS * REGISTERS_PER_BANK];
        self.high_water = [0; NUM_BANKS];
        self.allocations = 0;
    }
}
