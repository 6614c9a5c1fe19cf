// This module implements the call protocol. A ParameterStage collects the argument nodes of
// one call site together with the convention slot each one must reach, then emits the call:
// caller-saved registers that hold live values are saved first; arguments are generated
// heaviest first with their convention register as a hint, parking a finished argument in a
// frame slot when the next one needs more registers than remain; the function pointer is
// generated last and every value is placed by one parallel move (stack arguments below a
// 16-byte aligned rsp, the target in RAX); after `call rax` the result is copied out of the
// return register into a fresh location and the saved registers are restored in reverse.

//! Parameter staging for native calls.

use std::cmp::Reverse;

use bumpalo::{collections::Vec as BumpVec, Bump};

use super::ExpressionTree;
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::{AsmReg, RegBitSet};
use crate::core::storage::{Location, RawStorage};
use crate::core::types::{NodeId, ValueKind};
use crate::x64::calling_convention::{CCAssigner, CCAssignment, SysVAssigner};
use crate::x64::parallel_move::{MoveTarget, ParallelMove};

/// An argument node and the slot the convention gives it.
#[derive(Debug, Clone, Copy)]
struct Binding {
    node: NodeId,
    assignment: CCAssignment,
}

impl Binding {
    fn target(&self) -> Option<MoveTarget> {
        match (self.assignment.reg, self.assignment.stack_off) {
            (Some(reg), _) => Some(MoveTarget::Register(reg)),
            (None, Some(offset)) => Some(MoveTarget::Outgoing(offset)),
            (None, None) => None,
        }
    }
}

/// Staging state of one call site.
pub struct ParameterStage<'arena> {
    arena: &'arena Bump,
    assigner: SysVAssigner,
    bindings: BumpVec<'arena, Binding>,
    /// Registers preserved across the call, in save order.
    saved: BumpVec<'arena, AsmReg>,
}

impl<'arena> ParameterStage<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            assigner: SysVAssigner::new(),
            bindings: BumpVec::new_in(arena),
            saved: BumpVec::new_in(arena),
        }
    }

    /// Append the next argument and assign its convention slot.
    pub fn add_parameter(&mut self, tree: &ExpressionTree<'arena>, node: NodeId) -> CompileResult<()> {
        let mut assignment = CCAssignment::new(tree.node(node)?.kind);
        self.assigner.assign_arg(&mut assignment);
        self.bindings.push(Binding { node, assignment });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Convention slot of argument `position`.
    pub fn assignment(&self, position: usize) -> Option<CCAssignment> {
        self.bindings.get(position).map(|binding| binding.assignment)
    }

    /// Bytes of stack arguments, rounded up to 16.
    pub fn stack_size(&self) -> u32 {
        self.assigner.get_stack_size()
    }

    /// Emit the call to `function` and return where its result lives.
    pub fn emit_call(
        mut self,
        tree: &mut ExpressionTree<'arena>,
        function: NodeId,
        call: NodeId,
        kind: ValueKind,
        hint: Option<AsmReg>,
    ) -> CompileResult<RawStorage> {
        let caller_saved = self.assigner.get_ccinfo().caller_saved_regs;

        let mut live = tree.registers.live();
        live.intersect(&caller_saved);
        self.save(tree, live)?;

        let values = self.generate_arguments(tree)?;
        let target = tree.generate(function, Some(SysVAssigner::CALL_TARGET))?;

        let mut moves = ParallelMove::new(self.arena);
        for (binding, value) in self.bindings.iter().zip(values.iter()) {
            if let Some(slot) = binding.target() {
                moves.add(slot, value.location());
            }
        }
        moves.add(MoveTarget::Register(SysVAssigner::CALL_TARGET), target.location());

        // Temporaries die at the call; their contents are read by the moves
        // below, which allocate nothing.
        for value in values {
            tree.release_raw(value)?;
        }
        tree.release_raw(target)?;

        // Shared values first generated while staging stay live past the call.
        let mut late = tree.registers.live();
        late.intersect(&caller_saved);
        late.subtract(&RegBitSet::from_regs(&self.saved));
        self.save(tree, late)?;

        let stack_size = self.stack_size();
        let codegen = tree.codegen()?;
        let outgoing = stack_size + codegen.call_padding(stack_size);
        codegen.reserve_stack(outgoing)?;
        let moved = moves.emit(codegen.encoder_mut())?;
        codegen.encoder_mut().call_reg(SysVAssigner::CALL_TARGET)?;
        codegen.release_stack(outgoing)?;
        log::debug!(
            "call node {call}: {} arguments, {moved} moves, {outgoing} bytes outgoing, {} registers saved",
            self.bindings.len(),
            self.saved.len()
        );

        let result = capture_return(tree, call, kind, hint)?;

        for &reg in self.saved.iter().rev() {
            tree.codegen()?.restore_register(reg)?;
        }
        tree.stats.calls_emitted += 1;
        tree.stats.registers_saved += self.saved.len();
        Ok(result)
    }

    fn save(&mut self, tree: &mut ExpressionTree<'arena>, regs: RegBitSet) -> CompileResult<()> {
        for reg in regs.iter() {
            tree.codegen()?.save_register(reg)?;
            log::trace!("saved {reg} across call");
            self.saved.push(reg);
        }
        Ok(())
    }

    /// Generate every argument, heaviest first, returning values by position.
    fn generate_arguments(&self, tree: &mut ExpressionTree<'arena>) -> CompileResult<Vec<RawStorage>> {
        let counts = self
            .bindings
            .iter()
            .map(|binding| tree.labeled_count(binding.node))
            .collect::<CompileResult<Vec<_>>>()?;

        // Stable sort keeps the leftmost argument first among equals.
        let mut order = (0..self.bindings.len()).collect::<Vec<_>>();
        order.sort_by_key(|&position| Reverse(counts[position]));

        let mut values: Vec<Option<RawStorage>> = (0..self.bindings.len()).map(|_| None).collect();
        for (step, &position) in order.iter().enumerate() {
            let binding = self.bindings[position];
            let value = tree.generate(binding.node, binding.assignment.reg)?;
            let value = match order.get(step + 1) {
                Some(&next) => {
                    let next_bank = self.bindings[next].assignment.kind.bank();
                    tree.park_if_pressured(value, counts[next], next_bank)?
                }
                None => value,
            };
            values[position] = Some(value);
        }
        Ok(values.into_iter().flatten().collect())
    }
}

/// Copy the result out of the return register before saved registers are
/// restored over it.
///
/// Takes the hint if free, then the return register itself, then any free
/// register, then a frame slot.
fn capture_return(
    tree: &mut ExpressionTree<'_>,
    call: NodeId,
    kind: ValueKind,
    hint: Option<AsmReg>,
) -> CompileResult<RawStorage> {
    let ret = SysVAssigner::return_register(kind);
    let preferred = match hint {
        Some(reg) if tree.registers.is_free(reg) => reg,
        _ => ret,
    };

    if let Some(reg) = tree.try_register(kind.bank(), Some(call), Some(preferred)) {
        tree.emit_load(reg, Location::Register(ret))?;
        return Ok(RawStorage::owned(Location::Register(reg), kind));
    }

    let codegen = tree.codegen()?;
    match codegen.allocate_slot() {
        Some(offset) => {
            codegen.emit_spill(ret, offset)?;
            Ok(RawStorage::owned(Location::Stack(offset), kind))
        }
        None => Err(CompileError::exhausted(kind.bank(), "capturing a call result")),
    }
}
