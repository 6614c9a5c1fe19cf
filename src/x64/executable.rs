//! Executable memory for finished functions.

use std::io;

use memmap2::{Mmap, MmapMut};

use crate::core::stats::CompileStats;
use crate::core::types::NativeFunction;

/// Machine code mapped read + execute.
///
/// The mapping is released on drop, so every function pointer into it must
/// be dead by then.
pub struct ExecutableCode {
    map: Mmap,
    len: usize,
}

impl ExecutableCode {
    /// Copy `code` into a fresh anonymous mapping and flip it to executable.
    pub fn new(code: &[u8]) -> io::Result<Self> {
        let mut map = MmapMut::map_anon(code.len().max(1))?;
        map[..code.len()].copy_from_slice(code);
        let map = map.make_exec()?;
        log::trace!("mapped {} bytes of code at {:p}", code.len(), map.as_ptr());
        Ok(Self { map, len: code.len() })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The machine code bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.map[..self.len]
    }
}

impl std::fmt::Debug for ExecutableCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableCode")
            .field("address", &self.as_ptr())
            .field("len", &self.len)
            .finish()
    }
}

/// A compiled expression tree, callable as `F`.
///
/// Owns the code mapping. The entry point is handed out by reference so it
/// cannot outlive the mapping by accident; a copied-out pointer must not be
/// called after this value is dropped.
pub struct CompiledFunction<F> {
    code: ExecutableCode,
    entry: F,
    stats: CompileStats,
}

impl<F: NativeFunction> CompiledFunction<F> {
    pub(crate) fn new(code: &[u8], stats: CompileStats) -> io::Result<Self> {
        let code = ExecutableCode::new(code)?;
        // SAFETY: the code was generated for signature `F` and lives in
        // `code`, which is dropped together with `entry`.
        let entry = unsafe { F::from_code(code.as_ptr()) };
        Ok(Self { code, entry, stats })
    }

    /// The native entry point.
    pub fn entry(&self) -> &F {
        &self.entry
    }

    /// The machine code bytes.
    pub fn code(&self) -> &[u8] {
        self.code.bytes()
    }

    /// Statistics of the compilation that produced this function.
    pub fn stats(&self) -> &CompileStats {
        &self.stats
    }
}

impl<F> std::fmt::Debug for CompiledFunction<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("code", &self.code)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_is_copied() {
        let code = [0x48, 0x89, 0xF8, 0xC3];
        let exec = ExecutableCode::new(&code).unwrap();
        assert_eq!(exec.bytes(), &code);
        assert_eq!(exec.len(), 4);
        assert!(!exec.as_ptr().is_null());
    }

    #[cfg(all(target_arch = "x86_64", unix))]
    #[test]
    fn test_handwritten_function_runs() {
        // mov rax, rdi; add rax, rsi; ret
        let code = [0x48, 0x89, 0xF8, 0x48, 0x01, 0xF0, 0xC3];
        let compiled =
            CompiledFunction::<extern "C" fn(i64, i64) -> i64>::new(&code, CompileStats::default())
                .unwrap();
        assert_eq!((compiled.entry())(40, 2), 42);
        assert_eq!(compiled.code().len(), 7);
    }
}
