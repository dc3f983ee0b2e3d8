//! Per-worker batched program execution and worker-local merging.

use std::ops::Range;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use log::debug;

use super::DriverError;
use crate::program::{CallInst, Instruction, Program, SplitInst};
use crate::split::{SplitChunk, SplitStream};
use crate::value::{CallArgs, Value};

/// Per-instruction splitter state within one worker.
enum SplitterState {
    Unstarted,
    /// The splitter answers range queries directly.
    Direct,
    /// The splitter returned a cursor on first use.
    Streaming(Box<dyn SplitStream>),
}

/// Walks the worker's index range in batches, executing the program once per
/// batch, then merges the accumulated pieces locally.
///
/// Within a worker batches run in strictly increasing index order, so
/// stateful split cursors see monotonic ranges. Returns the worker's merged
/// context: one entry per slot, `None` for targets that need no shipment.
pub(super) fn run_worker(
    worker: usize,
    range: Range<usize>,
    program: &Program,
    values: &[Option<Value>],
    batch_size: usize,
) -> Result<Vec<Option<Value>>> {
    debug!(
        "worker {worker} range {}..{} batch size {batch_size}",
        range.start, range.end
    );
    let started = Instant::now();

    let mut pieces: Vec<Vec<Value>> = vec![Vec::new(); program.slot_count()];
    let mut splitters: Vec<SplitterState> = program
        .instructions()
        .iter()
        .map(|_| SplitterState::Unstarted)
        .collect();

    let mut start = range.start;
    'batches: while start < range.end {
        let end = (start + batch_size).min(range.end);
        for (position, inst) in program.instructions().iter().enumerate() {
            match inst {
                Instruction::Split(split) => {
                    match next_piece(&mut splitters[position], split, start, end, values)? {
                        Some(piece) => pieces[split.target.index()].push(piece),
                        // The source ran out before the assigned range did.
                        None => break 'batches,
                    }
                }
                Instruction::Call(call) => {
                    if let Some(result) = invoke(call, &pieces, worker)? {
                        pieces[call.target.index()].push(result);
                    }
                }
            }
        }
        start = end;
    }

    let processed = started.elapsed();
    let context = local_merge(program, pieces)?;
    debug!(
        "worker {worker} processing {:?} merge {:?}",
        processed,
        started.elapsed() - processed
    );
    Ok(context)
}

/// Advances one split instruction by a batch.
fn next_piece(
    state: &mut SplitterState,
    split: &SplitInst,
    start: usize,
    end: usize,
    values: &[Option<Value>],
) -> Result<Option<Value>> {
    match state {
        SplitterState::Unstarted => {
            let value = values[split.target.index()]
                .as_ref()
                .ok_or(DriverError::MissingValue { slot: split.target })?;
            match split.ty.split(start, end, value)? {
                SplitChunk::Piece(piece) => {
                    *state = SplitterState::Direct;
                    Ok(Some(piece))
                }
                SplitChunk::Stop => {
                    *state = SplitterState::Direct;
                    Ok(None)
                }
                SplitChunk::Stream(mut cursor) => {
                    let piece = cursor.next_piece(start, end)?;
                    *state = SplitterState::Streaming(cursor);
                    Ok(piece)
                }
            }
        }
        SplitterState::Direct => {
            let value = values[split.target.index()]
                .as_ref()
                .ok_or(DriverError::MissingValue { slot: split.target })?;
            match split.ty.split(start, end, value)? {
                SplitChunk::Piece(piece) => Ok(Some(piece)),
                SplitChunk::Stop => Ok(None),
                SplitChunk::Stream(_) => {
                    bail!("splitter for slot {} changed to streaming mid-run", split.target)
                }
            }
        }
        SplitterState::Streaming(cursor) => Ok(cursor.next_piece(start, end)?),
    }
}

/// Calls a kernel on the latest piece in each argument slot.
fn invoke(call: &CallInst, pieces: &[Vec<Value>], worker: usize) -> Result<Option<Value>> {
    let mut args = Vec::with_capacity(call.args.len());
    for slot in &call.args {
        let piece = pieces[slot.index()].last().cloned().ok_or(DriverError::MissingPiece {
            name: call.name,
            slot: *slot,
        })?;
        args.push(piece);
    }
    let mut kwargs = Vec::with_capacity(call.kwargs.len());
    for (name, slot) in &call.kwargs {
        let piece = pieces[slot.index()].last().cloned().ok_or(DriverError::MissingPiece {
            name: call.name,
            slot: *slot,
        })?;
        kwargs.push((name.as_str(), piece));
    }
    (call.kernel)(CallArgs {
        args: &args,
        kwargs: &kwargs,
    })
    .with_context(|| format!("call `{}` failed on worker {worker}", call.name))
}

/// Worker-local merge: mutable targets combine their per-batch pieces into a
/// single partial; immutable targets are dropped, since their value on the
/// orchestrator is unchanged.
fn local_merge(program: &Program, mut pieces: Vec<Vec<Value>>) -> Result<Vec<Option<Value>>> {
    let mut merged: Vec<Option<Value>> = vec![None; pieces.len()];
    for (slot, ty, mutable) in program.merge_targets() {
        if !mutable {
            continue;
        }
        let Some(ty) = ty else {
            continue;
        };
        merged[slot.index()] = ty
            .combine(std::mem::take(&mut pieces[slot.index()]))
            .with_context(|| format!("local merge failed for slot {slot}"))?;
    }
    Ok(merged)
}
