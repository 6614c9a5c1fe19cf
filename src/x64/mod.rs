//! x86-64 architecture-specific components.
//!
//! This module contains all x86-64 specific code:
//! - Instruction encoding using iced-x86
//! - System V calling convention and frame layout
//! - Function prologue, epilogue and call-site stack bookkeeping
//! - Parallel moves for staging call arguments
//! - Executable memory for finished functions

pub mod calling_convention;
pub mod encoder;
pub mod executable;
pub mod function_codegen;
pub mod parallel_move;

pub use calling_convention::{CCAssigner, CCAssignment, CCInfo, FunctionFrame, SysVAssigner};
pub use encoder::{ArithOp, EncodingError, X64Encoder};
pub use executable::{CompiledFunction, ExecutableCode};
pub use function_codegen::FunctionCodegen;
pub use parallel_move::{MoveTarget, ParallelMove};
