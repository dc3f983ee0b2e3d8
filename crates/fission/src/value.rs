//! Dynamically typed values and kernel references exchanged between the
//! graph, compiled programs, and wrapped library functions.

use std::any::Any;
use std::sync::Arc;

use anyhow::{anyhow, Result};

/// A dynamically typed value flowing through the computation graph.
///
/// Values are shared by reference: cloning bumps an `Arc`, and identity (used
/// for dependency wiring and slot deduplication) is pointer identity.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Wraps a concrete value for use as a graph argument or split piece.
pub fn value<T: Any + Send + Sync>(inner: T) -> Value {
    Arc::new(inner)
}

/// Returns whether two values share the same underlying allocation.
pub fn same_value(left: &Value, right: &Value) -> bool {
    Arc::ptr_eq(left, right)
}

/// Positional and keyword argument pieces materialized for one kernel call.
pub struct CallArgs<'a> {
    pub args: &'a [Value],
    pub kwargs: &'a [(&'a str, Value)],
}

impl CallArgs<'_> {
    /// Borrows the positional argument at `index` as a concrete type.
    pub fn arg<T: Any + Send + Sync>(&self, index: usize) -> Result<&T> {
        let value = self
            .args
            .get(index)
            .ok_or_else(|| anyhow!("missing positional argument {index}"))?;
        value
            .downcast_ref::<T>()
            .ok_or_else(|| anyhow!("positional argument {index} has an unexpected type"))
    }

    /// Borrows the keyword argument `name` as a concrete type, if present.
    pub fn kwarg<T: Any + Send + Sync>(&self, name: &str) -> Result<Option<&T>> {
        let Some((_, value)) = self.kwargs.iter().find(|(key, _)| *key == name) else {
            return Ok(None);
        };
        value
            .downcast_ref::<T>()
            .map(Some)
            .ok_or_else(|| anyhow!("keyword argument `{name}` has an unexpected type"))
    }
}

/// Type-erased reference to a wrapped library function.
///
/// Kernels receive split pieces, never whole inputs, and must not register
/// new graph nodes: they run on worker threads while the owning graph is
/// being evaluated.
pub type Kernel = Arc<dyn Fn(CallArgs<'_>) -> Result<Option<Value>> + Send + Sync>;

/// Wraps a closure as a [`Kernel`].
pub fn kernel<F>(f: F) -> Kernel
where
    F: Fn(CallArgs<'_>) -> Result<Option<Value>> + Send + Sync + 'static,
{
    Arc::new(f)
}
