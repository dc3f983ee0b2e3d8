//! Lazy task graph recording annotated calls for deferred, parallel
//! evaluation.
//!
//! Each call to an annotated function registers an operation node instead of
//! executing. Nodes are wired to their dependencies both through direct use
//! of a prior result and through aliasing of mutated arguments. On first read
//! of any node's value the whole graph is evaluated: split types are
//! inferred, type-compatible regions are lowered into pipeline programs, and
//! the driver executes each program over partitioned input ranges before
//! committing outputs back into the graph.

mod arena;
mod handle;
mod infer;
pub(crate) mod state;

pub use arena::TaskGraph;
pub use handle::LazyHandle;
pub use state::{ArgValue, NodeId};
