//! Node storage and handles.
//!
//! Nodes live in the [`ExpressionTree`](super::ExpressionTree) that built
//! them and refer to their operands by [`NodeId`]. The host only ever holds
//! handles: [`NodeRef<T>`] remembers the Rust type a node produces, and
//! [`AnyNode`] erases it to a [`ValueKind`] so nodes of different types can
//! share one argument list.

use std::fmt;
use std::marker::PhantomData;

use crate::core::diagnostics::NodeDescription;
use crate::core::storage::RawStorage;
use crate::core::types::{NativeType, NodeId, ValueKind};
use crate::x64::encoder::ArithOp;

/// Typed handle to a node producing a `T`.
pub struct NodeRef<T> {
    id: NodeId,
    _type: PhantomData<fn() -> T>,
}

impl<T> NodeRef<T> {
    pub(crate) fn new(id: NodeId) -> Self {
        Self { id, _type: PhantomData }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T: NativeType> NodeRef<T> {
    /// Forget the Rust type, keeping the value kind.
    pub fn erase(self) -> AnyNode {
        AnyNode { id: self.id, kind: T::KIND }
    }
}

impl<T> Clone for NodeRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NodeRef<T> {}

impl<T> PartialEq for NodeRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for NodeRef<T> {}

impl<T> fmt::Debug for NodeRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef({})", self.id)
    }
}

/// Type-erased handle to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnyNode {
    pub id: NodeId,
    pub kind: ValueKind,
}

impl<T: NativeType> From<NodeRef<T>> for AnyNode {
    fn from(node: NodeRef<T>) -> Self {
        node.erase()
    }
}

/// What a node computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeOp<'arena> {
    /// Constant bit pattern.
    Immediate(u64),
    /// Parameter of the compiled function.
    Parameter(usize),
    /// Integer arithmetic on two operands.
    Binary { op: ArithOp, left: NodeId, right: NodeId },
    /// Call through a native function pointer.
    Call { function: NodeId, args: &'arena [NodeId] },
}

impl NodeOp<'_> {
    /// Every operand, including a call's function pointer.
    pub fn operand_ids(&self) -> Vec<NodeId> {
        match *self {
            NodeOp::Immediate(_) | NodeOp::Parameter(_) => Vec::new(),
            NodeOp::Binary { left, right, .. } => vec![left, right],
            NodeOp::Call { function, args } => {
                let mut ids = Vec::with_capacity(args.len() + 1);
                ids.push(function);
                ids.extend_from_slice(args);
                ids
            }
        }
    }
}

const ARG_LABELS: [&str; 8] = ["arg0", "arg1", "arg2", "arg3", "arg4", "arg5", "arg6", "arg7"];

/// A node in the tree arena.
#[derive(Debug)]
pub(crate) struct Node<'arena> {
    pub id: NodeId,
    pub kind: ValueKind,
    pub op: NodeOp<'arena>,
    /// Number of constructed edges referencing this node.
    pub parent_count: u32,
    /// Set by the labeling pass.
    pub register_count: Option<u32>,
    /// Result of the first code generation visit of a shared node.
    pub cache: Option<RawStorage>,
}

impl<'arena> Node<'arena> {
    pub fn new(id: NodeId, kind: ValueKind, op: NodeOp<'arena>) -> Self {
        Self {
            id,
            kind,
            op,
            parent_count: 0,
            register_count: None,
            cache: None,
        }
    }

    pub fn increment_parent_count(&mut self) {
        self.parent_count += 1;
    }

    pub fn is_shared(&self) -> bool {
        self.parent_count > 1
    }

    pub fn name(&self) -> &'static str {
        match self.op {
            NodeOp::Immediate(_) => "ImmediateNode",
            NodeOp::Parameter(_) => "ParameterNode",
            NodeOp::Binary { op: ArithOp::Add, .. } => "AddNode",
            NodeOp::Binary { op: ArithOp::Sub, .. } => "SubNode",
            NodeOp::Binary { op: ArithOp::Mul, .. } => "MulNode",
            NodeOp::Call { .. } => "CallNode",
        }
    }

    /// Operand ids in declaration order.
    pub fn operands(&self) -> Vec<(&'static str, NodeId)> {
        match self.op {
            NodeOp::Immediate(_) | NodeOp::Parameter(_) => Vec::new(),
            NodeOp::Binary { left, right, .. } => vec![("left", left), ("right", right)],
            NodeOp::Call { function, args } => {
                let mut operands = vec![("function", function)];
                for (i, &arg) in args.iter().enumerate() {
                    operands.push((ARG_LABELS.get(i).copied().unwrap_or("arg"), arg));
                }
                operands
            }
        }
    }

    pub fn describe(&self) -> NodeDescription {
        NodeDescription {
            id: self.id,
            name: self.name(),
            kind: self.kind,
            parent_count: self.parent_count,
            operands: self.operands(),
            register_count: self.register_count,
            cache: self.cache.as_ref().map(RawStorage::location),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_erase_to_kind() {
        let node: NodeRef<f64> = NodeRef::new(NodeId(4));
        let any: AnyNode = node.into();
        assert_eq!(any, AnyNode { id: NodeId(4), kind: ValueKind::F64 });
        assert_eq!(format!("{node:?}"), "NodeRef(4)");
    }

    #[test]
    fn test_call_description() {
        let args = [NodeId(1), NodeId(2)];
        let mut node = Node::new(
            NodeId(3),
            ValueKind::I32,
            NodeOp::Call { function: NodeId(0), args: &args },
        );
        node.increment_parent_count();
        assert!(!node.is_shared());
        assert_eq!(
            node.describe().to_string(),
            "CallNode id=3 (i32), parents = 1, function = 0, arg0 = 1, arg1 = 2, unlabeled, not cached"
        );
    }
}
