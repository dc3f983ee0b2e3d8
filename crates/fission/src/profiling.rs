//! Lightweight phase-timing accumulators for evaluation runs.
//!
//! Timings accumulate globally across evaluations until taken or reset, so a
//! profiled run can report where time went without threading timers through
//! every layer. Worker threads report into the same accumulators.

use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;

/// Evaluation phases measured by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Inference,
    Compile,
    Execute,
    Merge,
}

const PHASES: [(Phase, &str); 4] = [
    (Phase::Inference, "inference"),
    (Phase::Compile, "compile"),
    (Phase::Execute, "execute"),
    (Phase::Merge, "merge"),
];

static PHASE_NS: Mutex<[u64; PHASES.len()]> = Mutex::new([0; PHASES.len()]);

fn phase_index(phase: Phase) -> usize {
    PHASES
        .iter()
        .position(|(candidate, _)| *candidate == phase)
        .expect("phase table covers every phase")
}

/// Clears all accumulated timings.
pub fn reset() {
    let mut slots = PHASE_NS.lock().expect("profiling state poisoned");
    *slots = [0; PHASES.len()];
}

pub fn add_phase_time(phase: Phase, duration: Duration) {
    let nanos = duration.as_nanos().min(u128::from(u64::MAX)) as u64;
    let mut slots = PHASE_NS.lock().expect("profiling state poisoned");
    let slot = &mut slots[phase_index(phase)];
    *slot = slot.saturating_add(nanos);
}

pub fn phase_time(phase: Phase) -> Duration {
    let slots = PHASE_NS.lock().expect("profiling state poisoned");
    Duration::from_nanos(slots[phase_index(phase)])
}

/// One-line summary of all accumulated phase timings.
pub fn report() -> String {
    let slots = PHASE_NS.lock().expect("profiling state poisoned");
    let mut out = String::new();
    for (index, (_, name)) in PHASES.iter().enumerate() {
        if index != 0 {
            let _ = write!(out, " | ");
        }
        let _ = write!(out, "{name} {:?}", Duration::from_nanos(slots[index]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_times_accumulate_and_reset() {
        reset();
        add_phase_time(Phase::Execute, Duration::from_millis(2));
        add_phase_time(Phase::Execute, Duration::from_millis(3));
        assert_eq!(phase_time(Phase::Execute), Duration::from_millis(5));
        assert!(report().contains("execute"));
        reset();
        assert_eq!(phase_time(Phase::Execute), Duration::ZERO);
    }
}
