// This module is the hub of the expression-tree compiler. ExpressionTree owns every node of a
// compilation unit in an index arena, owns the register pool and, while code is being
// generated, the FunctionCodegen that holds the encoder and the frame's temporary slots. The
// host builds nodes through typed constructors that check operand handles and native call
// signatures and count one parent edge per operand. Compilation runs the labeling pass over
// the whole tree, then the recursive code generation pass, caching the storage of every node
// with more than one parent so its code is emitted once. Storage primitives (allocation in a
// given register, temporary allocation falling back to frame slots, moves, parking under
// pressure, release) live here because every node kind shares them.

//! Expression trees and their two compilation passes.
//!
//! ```no_run
//! use bumpalo::Bump;
//! use exprjit::ExpressionTree;
//!
//! extern "C" fn add(a: i32, b: i32) -> i32 {
//!     a + b
//! }
//!
//! let arena = Bump::new();
//! let mut tree = ExpressionTree::new(&arena);
//! let function = tree.immediate(add as extern "C" fn(i32, i32) -> i32);
//! let left = tree.immediate(5i32);
//! let right = tree.immediate(7i32);
//! let sum = tree.call(function, &[left.into(), right.into()])?;
//!
//! let compiled = tree.compile::<extern "C" fn() -> i32>(sum)?;
//! assert_eq!((compiled.entry())(), 12);
//! # Ok::<(), exprjit::CompileError>(())
//! ```

mod binary;
mod call;
mod immediate;
mod node;
mod parameter;
mod parameter_stage;

use bumpalo::Bump;

use crate::core::diagnostics::{DiagnosticSink, NodeDescription};
use crate::core::error::{CompileError, CompileResult};
use crate::core::options::CompileOptions;
use crate::core::register_file::{AsmReg, RegAllocError, RegBank, RegBitSet, RegisterFile};
use crate::core::stats::CompileStats;
use crate::core::storage::{Location, RawStorage, Storage};
use crate::core::types::{IntegerType, NativeFunction, NativeType, NodeId, ValueKind, MAX_ARITY};
use crate::x64::calling_convention::SysVAssigner;
use crate::x64::encoder::ArithOp;
use crate::x64::executable::CompiledFunction;
use crate::x64::function_codegen::FunctionCodegen;
use crate::x64::parallel_move;

use node::{Node, NodeOp};

pub use call::compute_register_count;
pub use node::{AnyNode, NodeRef};
pub use parameter_stage::ParameterStage;

/// Owner of every node in one compilation unit.
pub struct ExpressionTree<'arena> {
    arena: &'arena Bump,
    nodes: Vec<Node<'arena>>,
    options: CompileOptions,
    registers: RegisterFile,
    /// Present while a function body is being generated.
    codegen: Option<FunctionCodegen<'arena>>,
    stats: CompileStats,
}

impl<'arena> ExpressionTree<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self::with_options(arena, CompileOptions::default())
    }

    pub fn with_options(arena: &'arena Bump, options: CompileOptions) -> Self {
        Self {
            arena,
            nodes: Vec::new(),
            options,
            registers: RegisterFile::new(options.allocatable_registers()),
            codegen: None,
            stats: CompileStats::default(),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn stats(&self) -> &CompileStats {
        &self.stats
    }

    /// The register pool.
    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Instructions emitted so far for the function being generated.
    pub fn instructions_emitted(&self) -> usize {
        self.codegen.as_ref().map_or(0, FunctionCodegen::instruction_count)
    }

    pub(crate) fn node(&self, id: NodeId) -> CompileResult<&Node<'arena>> {
        self.nodes.get(id.index()).ok_or(CompileError::InvalidNode { node: id })
    }

    fn node_mut(&mut self, id: NodeId) -> CompileResult<&mut Node<'arena>> {
        self.nodes.get_mut(id.index()).ok_or(CompileError::InvalidNode { node: id })
    }

    // ---------------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------------

    /// Register a node; its operands must already be validated.
    fn push(&mut self, kind: ValueKind, op: NodeOp<'arena>) -> NodeId {
        let id = NodeId(self.nodes.len());
        for operand in op.operand_ids() {
            self.nodes[operand.index()].increment_parent_count();
        }
        self.nodes.push(Node::new(id, kind, op));
        log::trace!("created {} {id} ({kind})", self.nodes[id.index()].name());
        id
    }

    /// Check that `node` belongs to this tree and produces `kind`.
    fn check_operand(&self, node: NodeId, kind: ValueKind) -> CompileResult<()> {
        if self.node(node)?.kind != kind {
            return Err(CompileError::InvalidNode { node });
        }
        Ok(())
    }

    /// A constant. Function pointers are constants too.
    pub fn immediate<T: NativeType>(&mut self, value: T) -> NodeRef<T> {
        NodeRef::new(self.push(T::KIND, NodeOp::Immediate(value.to_bits())))
    }

    /// Parameter `index` of the compiled function.
    pub fn parameter<T: NativeType>(&mut self, index: usize) -> NodeRef<T> {
        NodeRef::new(self.push(T::KIND, NodeOp::Parameter(index)))
    }

    pub fn add<T: IntegerType>(&mut self, left: NodeRef<T>, right: NodeRef<T>) -> CompileResult<NodeRef<T>> {
        self.binary(ArithOp::Add, left, right)
    }

    pub fn sub<T: IntegerType>(&mut self, left: NodeRef<T>, right: NodeRef<T>) -> CompileResult<NodeRef<T>> {
        self.binary(ArithOp::Sub, left, right)
    }

    pub fn mul<T: IntegerType>(&mut self, left: NodeRef<T>, right: NodeRef<T>) -> CompileResult<NodeRef<T>> {
        self.binary(ArithOp::Mul, left, right)
    }

    fn binary<T: IntegerType>(
        &mut self,
        op: ArithOp,
        left: NodeRef<T>,
        right: NodeRef<T>,
    ) -> CompileResult<NodeRef<T>> {
        self.check_operand(left.id(), T::KIND)?;
        self.check_operand(right.id(), T::KIND)?;
        let op = NodeOp::Binary { op, left: left.id(), right: right.id() };
        Ok(NodeRef::new(self.push(T::KIND, op)))
    }

    /// A call of `function` with `args`, checked against the signature `F`.
    pub fn call<F: NativeFunction>(
        &mut self,
        function: NodeRef<F>,
        args: &[AnyNode],
    ) -> CompileResult<NodeRef<F::Return>> {
        self.check_operand(function.id(), ValueKind::Ptr)?;

        let expected = F::param_kinds();
        if expected.len() != args.len() {
            return Err(CompileError::ArityMismatch {
                expected: expected.len(),
                found: args.len(),
            });
        }
        for (position, (arg, &kind)) in args.iter().zip(&expected).enumerate() {
            self.check_operand(arg.id, arg.kind)?;
            if arg.kind != kind {
                return Err(CompileError::ArgumentMismatch {
                    position,
                    expected: kind,
                    found: arg.kind,
                });
            }
        }

        let ids = self.arena.alloc_slice_fill_iter(args.iter().map(|arg| arg.id));
        let op = NodeOp::Call { function: function.id(), args: ids };
        Ok(NodeRef::new(self.push(<F::Return as NativeType>::KIND, op)))
    }

    // ---------------------------------------------------------------------
    // Queries and diagnostics
    // ---------------------------------------------------------------------

    pub fn parent_count(&self, node: NodeId) -> CompileResult<u32> {
        Ok(self.node(node)?.parent_count)
    }

    /// Register count, or `None` before labeling.
    pub fn register_count(&self, node: NodeId) -> CompileResult<Option<u32>> {
        Ok(self.node(node)?.register_count)
    }

    /// Register count of a node that must already be labeled.
    pub(crate) fn labeled_count(&self, node: NodeId) -> CompileResult<u32> {
        self.register_count(node)?
            .ok_or(CompileError::OrderingViolation { node })
    }

    pub fn describe(&self, node: NodeId) -> CompileResult<NodeDescription> {
        Ok(self.node(node)?.describe())
    }

    /// Describe every node, in construction order.
    pub fn print(&self, sink: &mut dyn DiagnosticSink) {
        for node in &self.nodes {
            sink.describe(&node.describe());
        }
    }

    // ---------------------------------------------------------------------
    // Labeling pass
    // ---------------------------------------------------------------------

    /// Label the subtree rooted at `root`, returning its register count.
    pub fn label<T>(&mut self, root: NodeRef<T>) -> CompileResult<u32> {
        self.label_subtree(root.id(), true)
    }

    /// Label children first, then store and return this node's count.
    ///
    /// The stored count may be revised; callers re-query it with
    /// [`ExpressionTree::register_count`] instead of keeping the return value.
    pub fn label_subtree(&mut self, node: NodeId, is_left: bool) -> CompileResult<u32> {
        let count = match self.node(node)?.op {
            NodeOp::Immediate(_) => immediate::label(is_left),
            NodeOp::Parameter(_) => parameter::label(is_left),
            NodeOp::Binary { left, right, .. } => binary::label(self, left, right)?,
            NodeOp::Call { function, args } => call::label(self, function, args)?,
        };
        self.set_register_count(node, count)
    }

    fn set_register_count(&mut self, id: NodeId, count: u32) -> CompileResult<u32> {
        let node = self.node_mut(id)?;
        // A cached value occupies a location until its last parent is done.
        let count = if node.is_shared() { count.max(1) } else { count };
        node.register_count = Some(count);
        log::trace!("labeled node {id}: register count {count}");
        Ok(count)
    }

    // ---------------------------------------------------------------------
    // Code generation pass
    // ---------------------------------------------------------------------

    /// Generate code for `node` and return where its value lives.
    ///
    /// The whole tree must be labeled first. A node with more than one
    /// parent is generated once; later visits return the cached storage.
    pub fn code_gen_value<T: NativeType>(&mut self, node: NodeRef<T>) -> CompileResult<Storage<T>> {
        Ok(self.generate(node.id(), None)?.typed())
    }

    pub(crate) fn generate(&mut self, id: NodeId, hint: Option<AsmReg>) -> CompileResult<RawStorage> {
        let node = self.node(id)?;
        if node.register_count.is_none() {
            return Err(CompileError::OrderingViolation { node: id });
        }
        let (kind, op, shared) = (node.kind, node.op, node.is_shared());
        if let Some(cached) = node.cache.as_ref().map(RawStorage::share) {
            self.stats.cache_hits += 1;
            log::trace!("node {id}: reusing {}", cached.location());
            return Ok(cached);
        }

        let storage = match op {
            NodeOp::Immediate(bits) => immediate::generate(kind, bits),
            NodeOp::Parameter(index) => parameter::generate(self.codegen()?, index, kind)?,
            NodeOp::Binary { op, left, right } => binary::generate(self, id, kind, op, left, right, hint)?,
            NodeOp::Call { function, args } => call::generate(self, id, kind, function, args, hint)?,
        };
        self.stats.nodes_compiled += 1;
        log::trace!("node {id}: value in {}", storage.location());

        if !shared {
            return Ok(storage);
        }
        let view = storage.share();
        self.node_mut(id)?.cache = Some(storage);
        Ok(view)
    }

    /// The code generator of the current function, started on first use.
    ///
    /// Outside [`ExpressionTree::compile`] the parameter list is inferred
    /// from the tree's parameter nodes.
    pub(crate) fn codegen(&mut self) -> CompileResult<&mut FunctionCodegen<'arena>> {
        let codegen = match self.codegen.take() {
            Some(codegen) => codegen,
            None => {
                let params = self.inferred_parameters()?;
                Self::start_function(self.arena, &params, self.options.temp_slots)?
            }
        };
        Ok(self.codegen.insert(codegen))
    }

    fn start_function(
        arena: &'arena Bump,
        params: &[ValueKind],
        temp_slots: usize,
    ) -> CompileResult<FunctionCodegen<'arena>> {
        let mut codegen = FunctionCodegen::new(arena, params, temp_slots)?;
        codegen.emit_prologue()?;
        Ok(codegen)
    }

    fn inferred_parameters(&self) -> CompileResult<Vec<ValueKind>> {
        let mut params = Vec::new();
        for node in &self.nodes {
            if let NodeOp::Parameter(index) = node.op {
                if index >= MAX_ARITY {
                    return Err(CompileError::ParameterMismatch {
                        index,
                        expected: None,
                        found: node.kind,
                    });
                }
                if params.len() <= index {
                    params.resize(index + 1, ValueKind::I64);
                }
                params[index] = node.kind;
            }
        }
        Ok(params)
    }

    // ---------------------------------------------------------------------
    // Storage primitives
    // ---------------------------------------------------------------------

    /// Allocate a specific register for a value of type `T`.
    pub fn allocate_register<T: NativeType>(&mut self, reg: AsmReg) -> CompileResult<Storage<T>> {
        if reg.bank != T::KIND.bank() {
            return Err(RegAllocError::InvalidRegister(reg).into());
        }
        self.registers.allocate_specific(reg, None)?;
        Ok(RawStorage::owned(Location::Register(reg), T::KIND).typed())
    }

    /// Allocate a register chosen by the pool, or a frame slot when the bank
    /// is exhausted.
    pub fn allocate_temporary<T: NativeType>(&mut self) -> CompileResult<Storage<T>> {
        Ok(self
            .temporary(T::KIND, None, None, "allocating a temporary")?
            .typed())
    }

    /// Move a value into `reg`, releasing its previous location.
    pub fn move_to_register<T: NativeType>(
        &mut self,
        storage: Storage<T>,
        reg: AsmReg,
    ) -> CompileResult<Storage<T>> {
        if storage.is_owned() && storage.register() == Some(reg) {
            return Ok(storage);
        }
        let target = self.allocate_register::<T>(reg)?;
        self.emit_load(reg, storage.location())?;
        self.release(storage)?;
        Ok(target)
    }

    /// Move a register value into a temporary frame slot.
    ///
    /// Values that are not owned registers, or that find no free slot, are
    /// returned unchanged.
    pub fn park<T: NativeType>(&mut self, storage: Storage<T>) -> CompileResult<Storage<T>> {
        Ok(self.park_raw(storage.into_raw())?.typed())
    }

    /// Return a storage's register or slot to the pool. Borrowed storages
    /// and immediates are dropped without effect.
    pub fn release<T>(&mut self, storage: Storage<T>) -> CompileResult<()> {
        self.release_raw(storage.into_raw())
    }

    pub(crate) fn release_raw(&mut self, storage: RawStorage) -> CompileResult<()> {
        if !storage.is_owned() {
            return Ok(());
        }
        match storage.location() {
            Location::Register(reg) => self.registers.free_register(reg)?,
            Location::Stack(offset) => self.codegen()?.free_slot(offset),
            Location::Immediate(_) => {}
        }
        Ok(())
    }

    pub(crate) fn try_register(
        &mut self,
        bank: RegBank,
        owner: Option<NodeId>,
        hint: Option<AsmReg>,
    ) -> Option<AsmReg> {
        self.registers.allocate(bank, owner, hint, &RegBitSet::new()).ok()
    }

    pub(crate) fn temporary(
        &mut self,
        kind: ValueKind,
        owner: Option<NodeId>,
        hint: Option<AsmReg>,
        context: &'static str,
    ) -> CompileResult<RawStorage> {
        if let Some(reg) = self.try_register(kind.bank(), owner, hint) {
            return Ok(RawStorage::owned(Location::Register(reg), kind));
        }
        match self.codegen()?.allocate_slot() {
            Some(offset) => Ok(RawStorage::owned(Location::Stack(offset), kind)),
            None => Err(CompileError::exhausted(kind.bank(), context)),
        }
    }

    /// Bring a value into a register the caller owns and may overwrite.
    pub(crate) fn materialize(
        &mut self,
        storage: RawStorage,
        owner: Option<NodeId>,
        hint: Option<AsmReg>,
        context: &'static str,
    ) -> CompileResult<AsmReg> {
        if storage.is_owned() {
            if let Some(reg) = storage.register() {
                self.registers.transfer(reg, owner)?;
                return Ok(reg);
            }
        }
        let bank = storage.kind().bank();
        let reg = self
            .try_register(bank, owner, hint)
            .ok_or(CompileError::exhausted(bank, context))?;
        self.emit_load(reg, storage.location())?;
        self.release_raw(storage)?;
        Ok(reg)
    }

    pub(crate) fn park_raw(&mut self, mut storage: RawStorage) -> CompileResult<RawStorage> {
        let reg = match storage.register() {
            Some(reg) if storage.is_owned() => reg,
            _ => return Ok(storage),
        };
        let codegen = self.codegen()?;
        let Some(offset) = codegen.allocate_slot() else {
            log::trace!("no free slot to park {reg}");
            return Ok(storage);
        };
        codegen.emit_spill(reg, offset)?;
        self.registers.free_register(reg)?;
        storage.relocate(Location::Stack(offset), true);
        self.stats.values_parked += 1;
        log::debug!("parked {reg} in {}", storage.location());
        Ok(storage)
    }

    /// Park `storage` when the operand evaluated next needs more registers of
    /// its bank than are free.
    pub(crate) fn park_if_pressured(
        &mut self,
        storage: RawStorage,
        next_count: u32,
        next_bank: RegBank,
    ) -> CompileResult<RawStorage> {
        let in_bank = storage.register().is_some_and(|reg| reg.bank == next_bank);
        if in_bank && next_count > self.registers.free_count(next_bank) {
            self.park_raw(storage)
        } else {
            Ok(storage)
        }
    }

    pub(crate) fn emit_load(&mut self, target: AsmReg, source: Location) -> CompileResult<()> {
        parallel_move::load(self.codegen()?.encoder_mut(), target, source)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Compilation
    // ---------------------------------------------------------------------

    /// Compile the tree rooted at `root` into a native function of type `F`.
    ///
    /// Every parameter node must match `F`'s parameter list. Each call
    /// starts from an empty register pool and empty node caches; a failed
    /// compilation leaves no function behind.
    pub fn compile<F: NativeFunction>(&mut self, root: NodeRef<F::Return>) -> CompileResult<CompiledFunction<F>> {
        self.node(root.id())?;
        let params = F::param_kinds();
        self.check_parameters(&params)?;
        self.reset_compilation();

        let count = self.label(root)?;
        log::debug!("labeled {} nodes, root {} needs {count} registers", self.nodes.len(), root.id());

        self.codegen = Some(Self::start_function(self.arena, &params, self.options.temp_slots)?);
        let kind = <F::Return as NativeType>::KIND;
        let result = self.generate(root.id(), Some(SysVAssigner::return_register(kind)))?;
        let location = result.location();
        self.release_raw(result)?;

        let code = self.finish_function(location, kind)?;
        let compiled = CompiledFunction::new(&code, self.stats.clone())?;
        log::debug!("compiled function at {:p}\n{}", compiled.code().as_ptr(), self.stats);
        Ok(compiled)
    }

    fn check_parameters(&self, params: &[ValueKind]) -> CompileResult<()> {
        for node in &self.nodes {
            if let NodeOp::Parameter(index) = node.op {
                let expected = params.get(index).copied();
                if expected != Some(node.kind) {
                    return Err(CompileError::ParameterMismatch {
                        index,
                        expected,
                        found: node.kind,
                    });
                }
            }
        }
        Ok(())
    }

    fn reset_compilation(&mut self) {
        self.registers.reset();
        for node in &mut self.nodes {
            node.cache = None;
        }
        self.stats.reset();
        self.codegen = None;
    }

    fn finish_function(&mut self, result: Location, kind: ValueKind) -> CompileResult<Vec<u8>> {
        let mut codegen = match self.codegen.take() {
            Some(codegen) => codegen,
            None => Self::start_function(self.arena, &[], self.options.temp_slots)?,
        };
        codegen.emit_epilogue(result, kind)?;
        self.stats.instructions_emitted = codegen.instruction_count();
        let code = codegen.finalize()?;
        self.stats.code_size = code.len();

        for bank in RegBank::ALL {
            let (used, total) = self.registers.bank_usage(bank);
            log::trace!(
                "{bank} registers: {used}/{total} held by cached values, peak {}",
                self.registers.high_water(bank)
            );
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diagnostics::CollectingSink;

    extern "C" fn add(a: i32, b: i32) -> i32 {
        a + b
    }

    type AddFn = extern "C" fn(i32, i32) -> i32;

    #[test]
    fn test_parent_counts() {
        let arena = Bump::new();
        let mut tree = ExpressionTree::new(&arena);
        let function = tree.immediate(add as AddFn);
        let x = tree.parameter::<i32>(0);
        let one = tree.immediate(1i32);
        let first = tree.call(function, &[x.into(), one.into()]).unwrap();
        let second = tree.call(function, &[x.into(), first.into()]).unwrap();

        assert_eq!(tree.parent_count(x.id()).unwrap(), 2);
        assert_eq!(tree.parent_count(function.id()).unwrap(), 2);
        assert_eq!(tree.parent_count(first.id()).unwrap(), 1);
        assert_eq!(tree.parent_count(second.id()).unwrap(), 0);
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn test_call_signature_checks() {
        let arena = Bump::new();
        let mut tree = ExpressionTree::new(&arena);
        let function = tree.immediate(add as AddFn);
        let a = tree.immediate(1i32);
        let wide = tree.immediate(2i64);

        assert!(matches!(
            tree.call(function, &[a.into()]),
            Err(CompileError::ArityMismatch { expected: 2, found: 1 })
        ));
        assert!(matches!(
            tree.call(function, &[a.into(), wide.into()]),
            Err(CompileError::ArgumentMismatch {
                position: 1,
                expected: ValueKind::I32,
                found: ValueKind::I64,
            })
        ));
        // Failed constructions add no edges.
        assert_eq!(tree.parent_count(a.id()).unwrap(), 0);
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let arena = Bump::new();
        let mut tree = ExpressionTree::new(&arena);
        let a = tree.immediate(1i64);
        let stray: NodeRef<i64> = NodeRef::new(NodeId(17));
        assert!(matches!(
            tree.add(a, stray),
            Err(CompileError::InvalidNode { node: NodeId(17) })
        ));
    }

    #[test]
    fn test_leaf_labels() {
        let arena = Bump::new();
        let mut tree = ExpressionTree::new(&arena);
        let a = tree.immediate(3i64);
        let p = tree.parameter::<i64>(0);
        let sum = tree.add(p, a).unwrap();

        assert_eq!(tree.register_count(sum.id()).unwrap(), None);
        assert_eq!(tree.label(sum).unwrap(), 1);
        assert_eq!(tree.register_count(p.id()).unwrap(), Some(1));
        assert_eq!(tree.register_count(a.id()).unwrap(), Some(0));
    }

    #[test]
    fn test_unlabeled_generation_is_an_ordering_violation() {
        let arena = Bump::new();
        let mut tree = ExpressionTree::new(&arena);
        let a = tree.immediate(3i64);
        let b = tree.immediate(4i64);
        let sum = tree.add(a, b).unwrap();
        assert!(matches!(
            tree.code_gen_value(sum),
            Err(CompileError::OrderingViolation { node }) if node == sum.id()
        ));
    }

    #[test]
    fn test_parameter_index_beyond_native_arity() {
        let arena = Bump::new();
        let mut tree = ExpressionTree::new(&arena);
        let last = tree.parameter::<i64>(MAX_ARITY - 1);
        tree.label(last).unwrap();
        let value = tree.code_gen_value(last).unwrap();
        assert!(matches!(value.location(), Location::Stack(_)));

        for index in [MAX_ARITY, 1 << 40, usize::MAX] {
            let arena = Bump::new();
            let mut tree = ExpressionTree::new(&arena);
            let huge = tree.parameter::<i64>(index);
            tree.label(huge).unwrap();
            assert!(matches!(
                tree.code_gen_value(huge),
                Err(CompileError::ParameterMismatch { index: i, expected: None, found: ValueKind::I64 })
                    if i == index
            ));
        }
    }

    #[test]
    fn test_shared_node_is_generated_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        let arena = Bump::new();
        let mut tree = ExpressionTree::new(&arena);
        let p = tree.parameter::<i64>(0);
        let q = tree.parameter::<i64>(1);
        let shared = tree.mul(p, q).unwrap();
        let left = tree.add(shared, p).unwrap();
        let right = tree.sub(shared, q).unwrap();
        let root = tree.add(left, right).unwrap();
        tree.label(root).unwrap();

        let first = tree.code_gen_value(shared).unwrap();
        let emitted = tree.instructions_emitted();
        let compiled = tree.stats().nodes_compiled;
        let second = tree.code_gen_value(shared).unwrap();

        assert_eq!(first, second);
        assert!(!first.is_owned());
        assert_eq!(tree.instructions_emitted(), emitted);
        assert_eq!(tree.stats().nodes_compiled, compiled);
        assert_eq!(tree.stats().cache_hits, 1);
        // Releasing a cached value's view keeps the register held.
        let reg = first.register().unwrap();
        tree.release(first).unwrap();
        assert!(tree.registers().is_allocated(reg));
    }

    #[test]
    fn test_storage_primitives() {
        let arena = Bump::new();
        let options = CompileOptions::new().gp_registers(1).temp_slots(1);
        let mut tree = ExpressionTree::with_options(&arena, options);

        let first = tree.allocate_temporary::<i64>().unwrap();
        assert_eq!(first.register(), Some(AsmReg::RAX));
        let second = tree.allocate_temporary::<i64>().unwrap();
        assert!(matches!(second.location(), Location::Stack(_)));
        assert!(tree
            .allocate_temporary::<i64>()
            .unwrap_err()
            .is_register_exhaustion());

        tree.release(second).unwrap();
        let parked = tree.park(first).unwrap();
        assert!(matches!(parked.location(), Location::Stack(_)));
        assert!(tree.registers().is_free(AsmReg::RAX));

        let back = tree.move_to_register(parked, AsmReg::RAX).unwrap();
        assert_eq!(back.register(), Some(AsmReg::RAX));
        assert!(matches!(
            tree.allocate_register::<f64>(AsmReg::RCX),
            Err(CompileError::RegisterFile(RegAllocError::InvalidRegister(_)))
        ));
        tree.release(back).unwrap();
        assert!(tree.registers().live().is_empty());
    }

    #[test]
    fn test_print_describes_every_node() {
        let arena = Bump::new();
        let mut tree = ExpressionTree::new(&arena);
        let function = tree.immediate(add as AddFn);
        let a = tree.immediate(5i32);
        let b = tree.immediate(7i32);
        let sum = tree.call(function, &[a.into(), b.into()]).unwrap();
        tree.label(sum).unwrap();

        let mut sink = CollectingSink::new();
        tree.print(&mut sink);
        let lines = sink.lines();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[3],
            "CallNode id=3 (i32), parents = 0, function = 0, arg0 = 1, arg1 = 2, register count = 1, not cached"
        );
    }
}
