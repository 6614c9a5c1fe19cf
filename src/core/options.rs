//! Compilation options.
//!
//! Options size the register pool and the temporary area of the stack frame.
//! Shrinking them is mostly useful for exercising the pressure paths of the
//! code generator; the defaults use every register the calling convention
//! leaves available.

use std::env;

use super::register_file::{AsmReg, RegBitSet};
use crate::x64::calling_convention::SysVAssigner;

/// Environment variable overriding [`CompileOptions::gp_registers`].
pub const ENV_GP_REGISTERS: &str = "EXPRJIT_GP_REGISTERS";
/// Environment variable overriding [`CompileOptions::xmm_registers`].
pub const ENV_XMM_REGISTERS: &str = "EXPRJIT_XMM_REGISTERS";
/// Environment variable overriding [`CompileOptions::temp_slots`].
pub const ENV_TEMP_SLOTS: &str = "EXPRJIT_TEMP_SLOTS";

/// Knobs for one expression tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Number of general-purpose registers in the pool.
    pub gp_registers: usize,
    /// Number of XMM registers in the pool.
    pub xmm_registers: usize,
    /// Number of 8-byte temporary slots reserved in every frame.
    pub temp_slots: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            gp_registers: SysVAssigner::GP_ALLOCATION_ORDER.len(),
            xmm_registers: SysVAssigner::XMM_ALLOCATION_ORDER.len(),
            temp_slots: 16,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `EXPRJIT_*` environment variables.
    ///
    /// Unparsable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(value) = read_env(ENV_GP_REGISTERS) {
            options = options.gp_registers(value);
        }
        if let Some(value) = read_env(ENV_XMM_REGISTERS) {
            options = options.xmm_registers(value);
        }
        if let Some(value) = read_env(ENV_TEMP_SLOTS) {
            options = options.temp_slots(value);
        }
        options
    }

    /// Limit the GP pool; clamped to the registers the convention allows.
    pub fn gp_registers(mut self, count: usize) -> Self {
        self.gp_registers = count.min(SysVAssigner::GP_ALLOCATION_ORDER.len());
        self
    }

    /// Limit the XMM pool; clamped to the registers the convention allows.
    pub fn xmm_registers(mut self, count: usize) -> Self {
        self.xmm_registers = count.min(SysVAssigner::XMM_ALLOCATION_ORDER.len());
        self
    }

    pub fn temp_slots(mut self, count: usize) -> Self {
        self.temp_slots = count;
        self
    }

    /// The allocatable register set these options describe.
    pub fn allocatable_registers(&self) -> RegBitSet {
        let gp = SysVAssigner::GP_ALLOCATION_ORDER.iter().take(self.gp_registers);
        let xmm = SysVAssigner::XMM_ALLOCATION_ORDER.iter().take(self.xmm_registers);
        let regs: Vec<AsmReg> = gp.chain(xmm).copied().collect();
        RegBitSet::from_regs(&regs)
    }
}

fn read_env(name: &str) -> Option<usize> {
    let value = env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("ignoring {name}={value:?}: not a count");
            None
        }
    }
}
