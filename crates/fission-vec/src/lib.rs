//! Reference collaborator library for the fission runtime: vector-backed
//! split strategies, a shared buffer supporting in-place mutation from
//! worker threads, and a small catalogue of annotated numeric kernels.

pub mod ops;
pub mod shared;
pub mod split;

pub use shared::{SharedSlice, SharedVec};
pub use split::{ScalarSumSplit, SharedVecSplit, VecSplit};
