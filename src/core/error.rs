// This module defines error types for the expression-tree compiler using the thiserror crate.
// CompileError is the main error enum covering the ways a compilation can fail: register
// exhaustion while generating code or staging a call, code generation reaching a node the
// labeling pass has not visited, argument and parameter mismatches against a native
// signature, foreign node handles, emitter failures and failures to map the finished code
// as executable. CompileResult<T> is a convenience alias for Result<T, CompileError>.

//! Error types for the expression-tree compiler.

use thiserror::Error;

use super::register_file::{RegAllocError, RegBank};
use super::types::{NodeId, ValueKind};
use crate::x64::encoder::EncodingError;

/// Main error type for tree compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("register exhaustion: no {bank} register or stack slot left while {context}")]
    RegisterExhaustion {
        bank: RegBank,
        context: &'static str,
    },

    #[error("node {node} reached code generation before it was labeled")]
    OrderingViolation { node: NodeId },

    #[error("argument {position} of call node has kind {found}, expected {expected}")]
    ArgumentMismatch {
        position: usize,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("call expects {expected} arguments, got {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("parameter {index} is declared as {found} but the function signature {}", describe_expected(.expected))]
    ParameterMismatch {
        index: usize,
        expected: Option<ValueKind>,
        found: ValueKind,
    },

    #[error("node {node} does not belong to this expression tree")]
    InvalidNode { node: NodeId },

    #[error("register file error: {0}")]
    RegisterFile(#[from] RegAllocError),

    #[error("instruction encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    #[error("failed to map code as executable: {0}")]
    ExecutableMemory(#[from] std::io::Error),
}

fn describe_expected(expected: &Option<ValueKind>) -> String {
    match expected {
        Some(kind) => format!("declares {kind}"),
        None => "has no such parameter".to_string(),
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

impl CompileError {
    /// Map a pool failure into the exhaustion condition callers report.
    pub(crate) fn exhausted(bank: RegBank, context: &'static str) -> Self {
        CompileError::RegisterExhaustion { bank, context }
    }

    pub fn is_register_exhaustion(&self) -> bool {
        matches!(self, CompileError::RegisterExhaustion { .. })
    }
}
