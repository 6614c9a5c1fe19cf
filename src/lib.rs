//! exprjit - just-in-time compilation of expression trees.
//!
//! A host program builds a tree of typed nodes (constants, parameters,
//! integer arithmetic and calls to native functions) and compiles it
//! straight to x86-64 machine code, getting back a function pointer with
//! the signature it asked for.
//!
//! # Primary Usage
//!
//! ```no_run
//! use bumpalo::Bump;
//! use exprjit::ExpressionTree;
//!
//! extern "C" fn scale(x: i64, factor: i64) -> i64 {
//!     x * factor
//! }
//!
//! let arena = Bump::new();
//! let mut tree = ExpressionTree::new(&arena);
//! let function = tree.immediate(scale as extern "C" fn(i64, i64) -> i64);
//! let x = tree.parameter::<i64>(0);
//! let three = tree.immediate(3i64);
//! let scaled = tree.call(function, &[x.into(), three.into()])?;
//! let root = tree.add(scaled, x)?;
//!
//! let compiled = tree.compile::<extern "C" fn(i64) -> i64>(root)?;
//! assert_eq!((compiled.entry())(5), 20);
//! # Ok::<(), exprjit::CompileError>(())
//! ```
//!
//! # Architecture
//!
//! - [`tree`] - Expression tree arena, node kinds, labeling and code generation
//! - [`core`](crate::core) - Shared infrastructure (register pool, storage, errors, options)
//! - [`x64`] - x86-64 specific code (encoder, calling convention, executable memory)

pub mod core;
pub mod tree;
pub mod x64;

pub use crate::core::{
    // Errors
    CompileError, CompileResult,
    // Configuration and reporting
    CompileOptions, CompileStats, CollectingSink, DiagnosticSink, LogSink, NodeDescription,
    // Values
    IntegerType, Location, NativeFunction, NativeType, NodeId, Storage, ValueKind,
    // Register allocation
    AsmReg, RegBank, RegisterFile,
};
pub use crate::tree::{compute_register_count, AnyNode, ExpressionTree, NodeRef, ParameterStage};
pub use crate::x64::CompiledFunction;
