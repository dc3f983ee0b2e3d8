//! Parallel execution driver: partitions input ranges, runs pipeline
//! programs over a worker pool, and merges partial results.
//!
//! A run moves through partitioning, per-worker batched execution,
//! worker-local merging, cross-worker merging, and finally hands the merged
//! slot values back for commit. The call is synchronous: it blocks until
//! every worker finishes, and a failure in any worker aborts the whole
//! pipeline run before anything is committed.

mod worker;

use std::ops::Range;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::profiling::{self, Phase};
use crate::program::{Instruction, Program, SlotId};
use crate::split::Elements;
use crate::value::Value;

use worker::run_worker;

/// Default elements per batch step; near L2-friendly working-set sizes.
pub const DEFAULT_BATCH_SIZE: usize = 65_536;

/// Errors surfaced by the execution driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Two split inputs of one program disagree on their element count.
    #[error("split inputs disagree on element count: {left} vs {right}")]
    PartitionMismatch { left: usize, right: usize },
    /// A split instruction targets a slot with no bound value.
    #[error("no value bound to slot {slot}")]
    MissingValue { slot: SlotId },
    /// A call consumed a slot that has produced no piece this batch.
    #[error("call `{name}` found no piece in slot {slot}")]
    MissingPiece { name: &'static str, slot: SlotId },
    /// A worker thread panicked.
    #[error("worker {worker} panicked")]
    WorkerPanic { worker: usize },
    /// The execution configuration is unusable.
    #[error("invalid execution config: {reason}")]
    InvalidConfig { reason: &'static str },
}

/// Configuration surface for graph evaluation.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Number of workers; each receives one contiguous index range.
    pub workers: usize,
    /// Elements processed per program step within a worker.
    pub batch_size: usize,
    /// Run in the calling thread when only one worker ends up with work.
    pub optimize_single: bool,
    /// Accumulate and report phase timings; single-worker only.
    pub profile: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        ExecConfig {
            workers: crate::env::default_workers().unwrap_or(1),
            batch_size: crate::env::default_batch_size().unwrap_or(DEFAULT_BATCH_SIZE),
            optimize_single: true,
            profile: false,
        }
    }
}

impl ExecConfig {
    pub fn with_workers(workers: usize) -> Self {
        ExecConfig {
            workers,
            ..ExecConfig::default()
        }
    }

    /// One worker per available CPU.
    pub fn parallel() -> Self {
        Self::with_workers(num_cpus::get().max(1))
    }

    pub(crate) fn validate(&self) -> Result<(), DriverError> {
        if self.workers == 0 {
            return Err(DriverError::InvalidConfig {
                reason: "workers must be at least 1",
            });
        }
        if self.batch_size == 0 {
            return Err(DriverError::InvalidConfig {
                reason: "batch size must be positive",
            });
        }
        if self.profile && (self.workers != 1 || !self.optimize_single) {
            return Err(DriverError::InvalidConfig {
                reason: "profiling requires a single in-process worker",
            });
        }
        Ok(())
    }
}

/// Runs one pipeline program across a pool of workers.
pub struct Driver {
    workers: usize,
    batch_size: usize,
    optimize_single: bool,
}

impl Driver {
    pub fn new(config: &ExecConfig) -> Self {
        Driver {
            workers: config.workers.max(1),
            batch_size: config.batch_size.max(1),
            optimize_single: config.optimize_single,
        }
    }

    /// Executes `program` over the slot values and returns the merged value
    /// per slot. Slots untouched by splitting fall back to their original
    /// bound value.
    pub fn run(&self, program: &Program, values: &[Option<Value>]) -> Result<Vec<Option<Value>>> {
        let total = total_elements(program, values)?;
        let ranges = match total {
            Some(total) => self.partitions(total),
            // Every split input is unbounded: one worker, one batch.
            None => vec![Some(0..self.batch_size)],
        };

        let started = Instant::now();
        let single_range = if self.workers == 1 && self.optimize_single {
            Some(ranges[0].clone())
        } else if self.workers > 1 && ranges.get(1).map_or(true, Option::is_none) {
            // Fewer elements than workers: collapse to one in-process worker.
            Some(ranges[0].clone())
        } else {
            None
        };

        let contexts = match single_range {
            Some(range) => {
                let context = match range {
                    Some(range) => run_worker(0, range, program, values, self.batch_size)?,
                    None => vec![None; program.slot_count()],
                };
                vec![context]
            }
            None => self.run_pool(&ranges, program, values)?,
        };
        profiling::add_phase_time(Phase::Execute, started.elapsed());

        let started = Instant::now();
        let results = global_merge(program, contexts, values)?;
        profiling::add_phase_time(Phase::Merge, started.elapsed());
        Ok(results)
    }

    /// Spawns one scoped worker thread per partition and joins them in
    /// worker-index order.
    fn run_pool(
        &self,
        ranges: &[Option<Range<usize>>],
        program: &Program,
        values: &[Option<Value>],
    ) -> Result<Vec<Vec<Option<Value>>>> {
        let batch_size = self.batch_size;
        thread::scope(|scope| {
            let handles: Vec<_> = ranges
                .iter()
                .enumerate()
                .map(|(worker, range)| {
                    range.clone().map(|range| {
                        scope.spawn(move || run_worker(worker, range, program, values, batch_size))
                    })
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| match handle {
                    Some(handle) => handle
                        .join()
                        .map_err(|_| DriverError::WorkerPanic { worker })?
                        .with_context(|| format!("worker {worker} failed")),
                    None => Ok(vec![None; program.slot_count()]),
                })
                .collect()
        })
    }

    /// Contiguous, non-overlapping index ranges, one per worker. Workers
    /// beyond the element count receive no work.
    fn partitions(&self, total: usize) -> Vec<Option<Range<usize>>> {
        let mut ranges = Vec::with_capacity(self.workers);
        for tid in 0..self.workers {
            let per_worker = total / self.workers;
            if per_worker == 0 && tid != 0 {
                ranges.push(None);
                continue;
            }
            let elements = if per_worker == 0 {
                total
            } else {
                // Round up so the remainder lands on the earliest workers.
                total / self.workers + usize::from(total % self.workers != 0)
            };
            let start = (elements * tid).min(total);
            let end = (elements * (tid + 1)).min(total);
            ranges.push(Some(start..end));
        }
        ranges
    }
}

/// Element count shared by the program's split inputs.
///
/// All bounded counts must agree; unbounded inputs (broadcast values) are
/// compatible with any count. `None` means every input is unbounded.
fn total_elements(program: &Program, values: &[Option<Value>]) -> Result<Option<usize>> {
    let mut total = None;
    for inst in program.instructions() {
        let Instruction::Split(split) = inst else {
            continue;
        };
        let value = values[split.target.index()]
            .as_ref()
            .ok_or(DriverError::MissingValue { slot: split.target })?;
        match split.ty.elements(value)? {
            Elements::Unbounded => continue,
            Elements::Count(count) => match total {
                None => total = Some(count),
                Some(existing) if existing == count => {}
                Some(existing) => {
                    return Err(DriverError::PartitionMismatch {
                        left: existing,
                        right: count,
                    }
                    .into())
                }
            },
        }
    }
    Ok(total)
}

/// Reduces per-worker merged contexts into final slot values.
///
/// Partials are gathered in worker-index order for reproducibility, although
/// combine is required to be associative and order-insensitive. Slots without
/// any partial fall back to their original bound value.
fn global_merge(
    program: &Program,
    contexts: Vec<Vec<Option<Value>>>,
    values: &[Option<Value>],
) -> Result<Vec<Option<Value>>> {
    let mut results: Vec<Option<Value>> = vec![None; program.slot_count()];

    if contexts.len() == 1 {
        let mut context = contexts;
        results = context.pop().expect("single worker context missing");
    } else {
        for (slot, ty, mutable) in program.merge_targets() {
            if !mutable {
                continue;
            }
            let Some(ty) = ty else {
                continue;
            };
            let partials: Vec<Value> = contexts
                .iter()
                .filter_map(|context| context[slot.index()].clone())
                .collect();
            results[slot.index()] = ty
                .combine(partials)
                .with_context(|| format!("cross-worker merge failed for slot {slot}"))?;
        }
    }

    for (slot, original) in values.iter().enumerate() {
        if results[slot].is_none() {
            results[slot] = original.clone();
        }
    }
    Ok(results)
}
