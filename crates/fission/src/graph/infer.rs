//! Split-type inference: generic uniquification, fixed-point syncing, and
//! pipeline assignment.
//!
//! Inference walks the graph in dependency order, syncing every parent
//! argument type with the producing child's return type and reconciling
//! same-named generics within each annotation, until a full pass changes
//! nothing. A sync failure at a dependency boundary is not fatal: it ends the
//! current pipeline and starts a new one at the failing node, trading fusion
//! for correctness. Unresolved generics after the fixed point are a contract
//! violation and abort evaluation.

use log::warn;

use super::state::{GraphInner, NodeId};
use crate::annotation::TypeSlot;
use crate::split::{SplitResult, SplitType, SplitTypeError};

pub(crate) fn infer_types(inner: &mut GraphInner) -> SplitResult<()> {
    uniquify_generics(inner);

    // Fixed point: re-sync until a full dependency-ordered pass is quiet.
    loop {
        let mut changed = false;
        let mut pipeline = 0usize;
        for id in inner.bottomup_order() {
            match sync_node(inner, id, &mut changed) {
                Ok(()) => inner.node_mut(id).pipeline = pipeline,
                Err(err) => {
                    warn!("pipeline break at `{}`: {err}", inner.node(id).name);
                    pipeline += 1;
                    inner.node_mut(id).pipeline = pipeline;
                }
            }
        }
        if !changed {
            break;
        }
    }

    finalize(inner)
}

/// Tags every generic type with an identity local to its annotation instance,
/// so same-named generics from different registrations never unify.
fn uniquify_generics(inner: &mut GraphInner) {
    for (ident, id) in inner.topdown_order().into_iter().enumerate() {
        for ty in inner.node_mut(id).annotation.types_mut() {
            if let SplitType::Generic(generic) = ty {
                generic.set_id(ident as u32);
            }
        }
    }
}

/// Syncs one node's annotation with the annotations of the children that
/// produce its arguments, then reconciles generics within the annotation.
fn sync_node(inner: &mut GraphInner, id: NodeId, changed: &mut bool) -> SplitResult<()> {
    let arg_count = inner.node(id).args.len();
    for index in 0..arg_count {
        let Some(child) = inner.node(id).args[index].as_node() else {
            continue;
        };
        if !inner.node(id).children.contains(&child) {
            continue;
        }
        let (parent, producer) = inner.two_nodes_mut(id, child);
        let arg_ty = parent.annotation.arg_type_mut(index);
        match producer.annotation.return_type_mut() {
            Some(ret) => *changed |= arg_ty.sync(ret)?,
            None => return Err(SplitTypeError::mismatch(arg_ty, "none")),
        }
    }

    let kwarg_count = inner.node(id).kwargs.len();
    for index in 0..kwarg_count {
        let Some(child) = inner.node(id).kwargs[index].1.as_node() else {
            continue;
        };
        if !inner.node(id).children.contains(&child) {
            continue;
        }
        let name = inner.node(id).kwargs[index].0.clone();
        let (parent, producer) = inner.two_nodes_mut(id, child);
        let Some(slot) = parent.annotation.kwarg_index(&name) else {
            continue;
        };
        let Some(kwarg_ty) = parent.annotation.slot_mut(TypeSlot::Kwarg(slot)) else {
            continue;
        };
        match producer.annotation.return_type_mut() {
            Some(ret) => *changed |= kwarg_ty.sync(ret)?,
            None => return Err(SplitTypeError::mismatch(kwarg_ty, "none")),
        }
    }

    // Same-named generics within one annotation resolve together. This also
    // propagates argument resolutions into the return type.
    let node = inner.node_mut(id);
    let slots = node.annotation.type_slots();
    for (position, a) in slots.iter().enumerate() {
        for b in &slots[position + 1..] {
            let same_placeholder = matches!(
                (node.annotation.slot(*a), node.annotation.slot(*b)),
                (Some(SplitType::Generic(left)), Some(SplitType::Generic(right)))
                    if left.same_placeholder(right)
            );
            if same_placeholder {
                *changed |= node.annotation.sync_slot_pair(*a, *b)?;
            }
        }
    }

    Ok(())
}

/// Replaces every generic with its resolved concrete type. An unresolved
/// generic means the annotations under-constrain the graph.
fn finalize(inner: &mut GraphInner) -> SplitResult<()> {
    for id in inner.topdown_order() {
        inner.node_mut(id).annotation.finalize_types()?;
    }
    Ok(())
}
