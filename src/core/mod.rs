// This module is the hub for the target-independent infrastructure of the expression-tree
// compiler: the register pool (bitset tracking per bank, owner bookkeeping, no eviction),
// value locations (Storage and its untyped form), native value kinds and function
// signatures, configuration of pool and frame sizes, compilation statistics, the injectable
// diagnostic sink, and the error taxonomy shared by every pass.

//! Core infrastructure.
//!
//! # Key Components
//!
//! ## Register Pool (`register_file`)
//! - General-purpose and XMM banks tracked with bitsets
//! - Owner bookkeeping per register, explicit release
//!
//! ## Value Locations (`storage`)
//! - Register, frame slot or immediate
//! - Owned vs. borrowed (cached) storages
//!
//! ## Types (`types`)
//! - Value kinds and their register banks
//! - Native function signatures for call nodes

pub mod diagnostics;
pub mod error;
pub mod options;
pub mod register_file;
pub mod stats;
pub mod storage;
pub mod types;

pub use diagnostics::{CollectingSink, DiagnosticSink, LogSink, NodeDescription};
pub use error::{CompileError, CompileResult};
pub use options::CompileOptions;
pub use register_file::{AsmReg, RegAllocError, RegBank, RegBitSet, RegisterFile};
pub use stats::CompileStats;
pub use storage::{Location, RawStorage, Storage};
pub use types::{IntegerType, NativeFunction, NativeType, NodeId, ValueKind, MAX_ARITY};
