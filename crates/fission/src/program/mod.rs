//! Pipeline programs: flat, slot-addressed split/call instruction sequences.
//!
//! A program is the executable form of one pipeline. Its value table maps
//! dense slot ids to registered sources (concrete data or graph-node
//! outputs); instructions either split a registered value into the current
//! batch range or call a kernel on previously produced pieces.

mod compile;

pub(crate) use compile::compile_pipelines;

use std::fmt;

use smallvec::SmallVec;

use crate::graph::{ArgValue, NodeId};
use crate::split::SplitType;
use crate::value::{Kernel, Value};

/// Index of one registered value slot within a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub(crate) u32);

impl SlotId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// What a program slot is bound to at execution time.
pub(crate) enum SlotSource {
    /// A concrete value registered at compile time.
    Data(Value),
    /// The output of a graph node, committed by this or an earlier pipeline.
    Node(NodeId),
}

impl SlotSource {
    fn matches(&self, arg: &ArgValue) -> bool {
        match (self, arg) {
            (SlotSource::Data(value), ArgValue::Data(other)) => {
                crate::value::same_value(value, other)
            }
            (SlotSource::Node(id), ArgValue::Node(other)) => id == other,
            _ => false,
        }
    }
}

/// Splits one registered value into the current batch range.
pub struct SplitInst {
    pub target: SlotId,
    pub ty: SplitType,
    /// Whether the consuming operation mutates this value; mutable targets
    /// are merged back after execution.
    pub mutable: bool,
}

/// Calls a kernel on the latest pieces of its argument slots.
pub struct CallInst {
    pub target: SlotId,
    pub name: &'static str,
    pub(crate) kernel: Kernel,
    pub args: SmallVec<[SlotId; 4]>,
    pub kwargs: Vec<(String, SlotId)>,
    /// Return split type; `None` for void functions.
    pub ty: Option<SplitType>,
    /// Whether the result must be merged and shipped back. Cleared for
    /// results consumed only inside the pipeline.
    pub mutable: bool,
}

/// One step of a pipeline program.
pub enum Instruction {
    Split(SplitInst),
    Call(CallInst),
}

impl Instruction {
    /// Target slot, merge type, and merge flag for the merging passes.
    pub(crate) fn merge_parts(&self) -> (SlotId, Option<&SplitType>, bool) {
        match self {
            Instruction::Split(split) => (split.target, Some(&split.ty), split.mutable),
            Instruction::Call(call) => (call.target, call.ty.as_ref(), call.mutable),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Split(split) => {
                write!(f, "{} = split {}: {}", split.target, split.target, split.ty)?;
                if split.mutable {
                    write!(f, " mut")?;
                }
                Ok(())
            }
            Instruction::Call(call) => {
                write!(f, "{} = call {}(", call.target, call.name)?;
                let mut first = true;
                for arg in &call.args {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{arg}")?;
                }
                for (name, slot) in &call.kwargs {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{name}={slot}")?;
                }
                match &call.ty {
                    Some(ty) => write!(f, "): {ty}"),
                    None => write!(f, "): none"),
                }
            }
        }
    }
}

/// The executable form of one pipeline.
#[derive(Default)]
pub struct Program {
    insts: Vec<Instruction>,
    slots: Vec<SlotSource>,
}

impl Program {
    pub fn instructions(&self) -> &[Instruction] {
        &self.insts
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slots(&self) -> &[SlotSource] {
        &self.slots
    }

    pub(crate) fn push(&mut self, inst: Instruction) {
        self.insts.push(inst);
    }

    /// Slot already registered for this argument, by identity.
    pub(crate) fn lookup_slot(&self, arg: &ArgValue) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|source| source.matches(arg))
            .map(|index| SlotId(index as u32))
    }

    /// Registers a new value slot.
    pub(crate) fn register_slot(&mut self, source: SlotSource) -> SlotId {
        let slot = SlotId(self.slots.len() as u32);
        self.slots.push(source);
        slot
    }

    /// Final split type and merge flag per target: the last instruction
    /// writing each slot decides how it merges.
    pub(crate) fn merge_targets(&self) -> Vec<(SlotId, Option<&SplitType>, bool)> {
        let mut seen = vec![false; self.slots.len()];
        let mut targets = Vec::new();
        for inst in self.insts.iter().rev() {
            let (slot, ty, mutable) = inst.merge_parts();
            if seen[slot.index()] {
                continue;
            }
            seen[slot.index()] = true;
            targets.push((slot, ty, mutable));
        }
        targets
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.insts {
            writeln!(f, "{inst}")?;
        }
        Ok(())
    }
}
