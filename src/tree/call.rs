//! Call nodes.
//!
//! A call node holds a function-pointer operand and a runtime-sized list
//! of argument operands, all checked against the callee's native signature
//! when the node is built. Code generation is delegated to a fresh
//! [`ParameterStage`].

use super::parameter_stage::ParameterStage;
use super::ExpressionTree;
use crate::core::error::CompileResult;
use crate::core::register_file::AsmReg;
use crate::core::storage::RawStorage;
use crate::core::types::{NodeId, ValueKind};

/// Registers needed to evaluate two subtrees one after the other.
///
/// With equal needs, one more register holds the first result while the
/// second subtree runs; otherwise the larger need dominates. This is an
/// estimate: it steers evaluation order and parking, while running out of
/// registers is detected when an allocation actually fails.
pub fn compute_register_count(left: u32, right: u32) -> u32 {
    if left == right {
        left.saturating_add(1)
    } else {
        left.max(right)
    }
}

/// Label the arguments leftmost first and fold their counts pairwise.
///
/// The function pointer is labeled too, so it can be generated, but its
/// own count does not enter the call's count.
pub(crate) fn label(tree: &mut ExpressionTree<'_>, function: NodeId, args: &[NodeId]) -> CompileResult<u32> {
    let mut count: Option<u32> = None;
    for (position, &arg) in args.iter().enumerate() {
        tree.label_subtree(arg, position == 0)?;
        let arg_count = tree.labeled_count(arg)?;
        count = Some(match count {
            Some(acc) => compute_register_count(acc, arg_count),
            None => arg_count,
        });
    }
    tree.label_subtree(function, false)?;
    Ok(count.unwrap_or(0))
}

pub(crate) fn generate<'arena>(
    tree: &mut ExpressionTree<'arena>,
    id: NodeId,
    kind: ValueKind,
    function: NodeId,
    args: &[NodeId],
    hint: Option<AsmReg>,
) -> CompileResult<RawStorage> {
    let mut stage = ParameterStage::new(tree.arena());
    for &arg in args {
        stage.add_parameter(tree, arg)?;
    }
    stage.emit_call(tree, function, id, kind, hint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_count_table() {
        assert_eq!(compute_register_count(0, 0), 1);
        assert_eq!(compute_register_count(2, 2), 3);
        assert_eq!(compute_register_count(3, 5), 5);
        assert_eq!(compute_register_count(5, 3), 5);
    }

    #[test]
    fn test_register_count_symmetry() {
        for a in 0..16 {
            for b in 0..16 {
                assert_eq!(compute_register_count(a, b), compute_register_count(b, a));
                if a == b {
                    assert_eq!(compute_register_count(a, b), a + 1);
                } else {
                    assert_eq!(compute_register_count(a, b), a.max(b));
                }
            }
        }
    }
}
