//! Compilation statistics.

use std::fmt;

/// Counters gathered while compiling one expression tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileStats {
    /// Nodes whose code was generated (cache hits excluded).
    pub nodes_compiled: usize,

    /// Visits answered from a shared node's cached storage.
    pub cache_hits: usize,

    /// Call instructions emitted.
    pub calls_emitted: usize,

    /// Caller-saved registers preserved around calls.
    pub registers_saved: usize,

    /// Values moved to a stack slot to relieve register pressure.
    pub values_parked: usize,

    /// Machine instructions emitted.
    pub instructions_emitted: usize,

    /// Size of the finished code (bytes).
    pub code_size: usize,
}

impl CompileStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for CompileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Statistics:")?;
        writeln!(f, "  Nodes compiled: {}", self.nodes_compiled)?;
        writeln!(f, "  Cache hits: {}", self.cache_hits)?;
        writeln!(f, "  Calls emitted: {}", self.calls_emitted)?;
        writeln!(f, "  Registers saved: {}", self.registers_saved)?;
        writeln!(f, "  Values parked: {}", self.values_parked)?;
        writeln!(f, "  Instructions emitted: {}", self.instructions_emitted)?;
        write!(f, "  Code size: {} bytes", self.code_size)
    }
}
