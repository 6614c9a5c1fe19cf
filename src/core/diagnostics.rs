//! Node diagnostics.
//!
//! Every node can describe itself as a [`NodeDescription`]: its id, parent
//! count, operand ids and register/cache status. Descriptions are pushed into
//! a [`DiagnosticSink`] chosen by the caller, so the compiler itself never
//! writes to a fixed stream.

use std::fmt;

use super::storage::Location;
use super::types::{NodeId, ValueKind};

/// One-line structured description of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescription {
    pub id: NodeId,
    /// Node kind name, e.g. `CallNode`.
    pub name: &'static str,
    pub kind: ValueKind,
    pub parent_count: u32,
    /// Named operands in declaration order.
    pub operands: Vec<(&'static str, NodeId)>,
    /// Register count, once labeled.
    pub register_count: Option<u32>,
    /// Cached location, once a shared node has been compiled.
    pub cache: Option<Location>,
}

impl fmt::Display for NodeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} id={} ({}), parents = {}", self.name, self.id, self.kind, self.parent_count)?;
        for (label, operand) in &self.operands {
            write!(f, ", {label} = {operand}")?;
        }
        match self.register_count {
            Some(count) => write!(f, ", register count = {count}")?,
            None => write!(f, ", unlabeled")?,
        }
        match self.cache {
            Some(location) => write!(f, ", cached in {location}"),
            None => write!(f, ", not cached"),
        }
    }
}

/// Destination for node descriptions.
pub trait DiagnosticSink {
    fn describe(&mut self, description: &NodeDescription);
}

/// Routes descriptions to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn describe(&mut self, description: &NodeDescription) {
        log::debug!("{description}");
    }
}

/// Keeps every description, for tests and tooling.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    pub descriptions: Vec<NodeDescription>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendered lines, one per description.
    pub fn lines(&self) -> Vec<String> {
        self.descriptions.iter().map(ToString::to_string).collect()
    }
}

impl DiagnosticSink for CollectingSink {
    fn describe(&mut self, description: &NodeDescription) {
        self.descriptions.push(description.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::register_file::AsmReg;

    #[test]
    fn test_call_node_line() {
        let description = NodeDescription {
            id: NodeId(3),
            name: "CallNode",
            kind: ValueKind::I32,
            parent_count: 1,
            operands: vec![("function", NodeId(0)), ("arg0", NodeId(1)), ("arg1", NodeId(2))],
            register_count: Some(1),
            cache: None,
        };
        assert_eq!(
            description.to_string(),
            "CallNode id=3 (i32), parents = 1, function = 0, arg0 = 1, arg1 = 2, register count = 1, not cached"
        );
    }

    #[test]
    fn test_collecting_sink() {
        let mut sink = CollectingSink::new();
        let description = NodeDescription {
            id: NodeId(7),
            name: "ImmediateNode",
            kind: ValueKind::I64,
            parent_count: 2,
            operands: Vec::new(),
            register_count: None,
            cache: Some(Location::Register(AsmReg::RBX)),
        };
        sink.describe(&description);
        assert_eq!(sink.descriptions.len(), 1);
        assert!(sink.lines()[0].ends_with("unlabeled, cached in rbx"));
    }
}
