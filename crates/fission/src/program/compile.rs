//! Lowers inferred pipelines into slot-addressed programs.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use super::{CallInst, Instruction, Program, SlotId, SlotSource, SplitInst};
use crate::graph::state::GraphInner;
use crate::graph::ArgValue;
use crate::split::SplitType;

/// Builds one program per pipeline, in pipeline (execution) order.
///
/// Nodes are visited in dependency order, each exactly once. Every argument
/// not yet registered in its pipeline's program gets a fresh slot and a
/// `Split` instruction typed with the consuming annotation's argument type;
/// arguments produced earlier in the same pipeline reuse the producer's
/// result slot and need no split. Each node then appends one `Call` whose
/// result slot is always freshly allocated.
pub(crate) fn compile_pipelines(inner: &GraphInner) -> Vec<(usize, Program)> {
    let mut programs: BTreeMap<usize, Program> = BTreeMap::new();

    for id in inner.bottomup_order() {
        let node = inner.node(id);
        let program = programs.entry(node.pipeline).or_default();

        let mut arg_slots: SmallVec<[SlotId; 4]> = SmallVec::new();
        for (index, arg) in node.args.iter().enumerate() {
            let slot = ensure_input_slot(
                program,
                arg,
                node.annotation.arg_type(index).clone(),
                node.annotation.is_mutable_arg(index),
            );
            arg_slots.push(slot);
        }

        let mut kwarg_slots = Vec::with_capacity(node.kwargs.len());
        for (name, arg) in &node.kwargs {
            let ty = node
                .annotation
                .kwarg_type(name)
                .cloned()
                .unwrap_or(SplitType::Broadcast);
            let slot = ensure_input_slot(program, arg, ty, node.annotation.is_mutable_kwarg(name));
            kwarg_slots.push((name.clone(), slot));
        }

        let result = program.register_slot(SlotSource::Node(id));
        program.push(Instruction::Call(CallInst {
            target: result,
            name: node.name,
            kernel: node.kernel.clone(),
            args: arg_slots,
            kwargs: kwarg_slots,
            ty: node.annotation.return_type().cloned(),
            // Results nobody reads outside the pipeline skip the merge.
            mutable: node.send_result,
        }));
    }

    programs.into_iter().collect()
}

/// Looks up or allocates the slot feeding one argument, emitting a `Split`
/// for newly registered inputs.
fn ensure_input_slot(
    program: &mut Program,
    arg: &ArgValue,
    ty: SplitType,
    mutable: bool,
) -> SlotId {
    if let Some(slot) = program.lookup_slot(arg) {
        return slot;
    }
    let source = match arg {
        ArgValue::Data(value) => SlotSource::Data(value.clone()),
        ArgValue::Node(id) => SlotSource::Node(*id),
    };
    let slot = program.register_slot(source);
    program.push(Instruction::Split(SplitInst {
        target: slot,
        ty,
        mutable,
    }));
    slot
}
