//! Annotated numeric kernels over vector and shared-buffer values.
//!
//! Each function registers a deferred call on the given graph and returns a
//! lazy handle; nothing executes until a handle is read or the graph is
//! evaluated. Kernels receive split pieces, never whole inputs.

use std::sync::Arc;

use anyhow::anyhow;
use once_cell::sync::Lazy;

use fission::{
    kernel, mutated, value, Annotated, Annotation, ArgValue, LazyHandle, SplitType, TaskGraph,
};

use crate::shared::SharedSlice;
use crate::split::{ScalarSumSplit, SharedVecSplit, VecSplit};

fn binary(name: &'static str, op: fn(f64, f64) -> f64) -> Annotated {
    Annotated::new(
        name,
        kernel(move |call| {
            let a = call.arg::<Vec<f64>>(0)?;
            let b = call.arg::<Vec<f64>>(1)?;
            if a.len() != b.len() {
                return Err(anyhow!(
                    "piece length mismatch: {} vs {}",
                    a.len(),
                    b.len()
                ));
            }
            let out: Vec<f64> = a.iter().zip(b.iter()).map(|(x, y)| op(*x, *y)).collect();
            Ok(Some(value(out)))
        }),
        Annotation::new(
            vec![VecSplit::split_type().into(), VecSplit::split_type().into()],
            Vec::new(),
            Some(VecSplit::split_type()),
        ),
    )
}

static ADD: Lazy<Annotated> = Lazy::new(|| binary("add", |x, y| x + y));
static SUBTRACT: Lazy<Annotated> = Lazy::new(|| binary("subtract", |x, y| x - y));
static MULTIPLY: Lazy<Annotated> = Lazy::new(|| binary("multiply", |x, y| x * y));
static DIVIDE: Lazy<Annotated> = Lazy::new(|| binary("divide", |x, y| x / y));

/// Elementwise sum of two vectors.
pub fn add(graph: &Arc<TaskGraph>, a: impl Into<ArgValue>, b: impl Into<ArgValue>) -> LazyHandle {
    ADD.call(graph, vec![a.into(), b.into()])
}

/// Elementwise difference of two vectors.
pub fn subtract(
    graph: &Arc<TaskGraph>,
    a: impl Into<ArgValue>,
    b: impl Into<ArgValue>,
) -> LazyHandle {
    SUBTRACT.call(graph, vec![a.into(), b.into()])
}

/// Elementwise product of two vectors.
pub fn multiply(
    graph: &Arc<TaskGraph>,
    a: impl Into<ArgValue>,
    b: impl Into<ArgValue>,
) -> LazyHandle {
    MULTIPLY.call(graph, vec![a.into(), b.into()])
}

/// Elementwise quotient of two vectors.
pub fn divide(
    graph: &Arc<TaskGraph>,
    a: impl Into<ArgValue>,
    b: impl Into<ArgValue>,
) -> LazyHandle {
    DIVIDE.call(graph, vec![a.into(), b.into()])
}

static SCALE: Lazy<Annotated> = Lazy::new(|| {
    Annotated::new(
        "scale",
        kernel(|call| {
            let a = call.arg::<Vec<f64>>(0)?;
            let factor = *call.arg::<f64>(1)?;
            let out: Vec<f64> = a.iter().map(|x| x * factor).collect();
            Ok(Some(value(out)))
        }),
        Annotation::new(
            vec![VecSplit::split_type().into(), SplitType::Broadcast.into()],
            Vec::new(),
            Some(VecSplit::split_type()),
        ),
    )
});

/// Scales a vector by a broadcast constant.
pub fn scale(graph: &Arc<TaskGraph>, a: impl Into<ArgValue>, factor: f64) -> LazyHandle {
    SCALE.call(graph, vec![a.into(), ArgValue::Data(value(factor))])
}

static ADD_SCALED: Lazy<Annotated> = Lazy::new(|| {
    Annotated::new(
        "add_scaled",
        kernel(|call| {
            let a = call.arg::<Vec<f64>>(0)?;
            let b = call.arg::<Vec<f64>>(1)?;
            let factor = call.kwarg::<f64>("factor")?.copied().unwrap_or(1.0);
            if a.len() != b.len() {
                return Err(anyhow!("piece length mismatch: {} vs {}", a.len(), b.len()));
            }
            let out: Vec<f64> = a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| x + y * factor)
                .collect();
            Ok(Some(value(out)))
        }),
        // `factor` is not named here, so it defaults to broadcast.
        Annotation::new(
            vec![VecSplit::split_type().into(), VecSplit::split_type().into()],
            Vec::new(),
            Some(VecSplit::split_type()),
        ),
    )
});

/// `a + b * factor`, with the factor passed as a broadcast keyword argument.
pub fn add_scaled(
    graph: &Arc<TaskGraph>,
    a: impl Into<ArgValue>,
    b: impl Into<ArgValue>,
    factor: f64,
) -> LazyHandle {
    ADD_SCALED.call_with_kwargs(
        graph,
        vec![a.into(), b.into()],
        vec![("factor".to_string(), ArgValue::Data(value(factor)))],
    )
}

static SCALE_INPLACE: Lazy<Annotated> = Lazy::new(|| {
    Annotated::new(
        "scale_inplace",
        kernel(|call| {
            let view = call.arg::<SharedSlice>(0)?;
            let factor = *call.arg::<f64>(1)?;
            view.with_mut(|slice| {
                for x in slice {
                    *x *= factor;
                }
            });
            Ok(None)
        }),
        Annotation::new(
            vec![
                mutated(SharedVecSplit::split_type()),
                SplitType::Broadcast.into(),
            ],
            Vec::new(),
            None,
        ),
    )
});

/// Scales a shared buffer in place.
///
/// Pass the same `Value` wrapper for every call touching one buffer: the
/// runtime orders mutating calls by argument identity, and identity is the
/// wrapper allocation, not the buffer inside it.
pub fn scale_inplace(graph: &Arc<TaskGraph>, buffer: impl Into<ArgValue>, factor: f64) -> LazyHandle {
    SCALE_INPLACE.call(graph, vec![buffer.into(), ArgValue::Data(value(factor))])
}

static SUM: Lazy<Annotated> = Lazy::new(|| {
    Annotated::new(
        "sum",
        kernel(|call| {
            let a = call.arg::<Vec<f64>>(0)?;
            Ok(Some(value(a.iter().sum::<f64>())))
        }),
        Annotation::new(
            vec![VecSplit::split_type().into()],
            Vec::new(),
            Some(ScalarSumSplit::split_type()),
        ),
    )
});

/// Sums a vector to a scalar. Per-batch partial sums merge by addition.
pub fn sum(graph: &Arc<TaskGraph>, a: impl Into<ArgValue>) -> LazyHandle {
    SUM.call(graph, vec![a.into()])
}

static MAXIMUM: Lazy<Annotated> = Lazy::new(|| {
    Annotated::new(
        "maximum",
        kernel(|call| {
            let a = call.arg::<Vec<f64>>(0)?;
            let b = call.arg::<Vec<f64>>(1)?;
            if a.len() != b.len() {
                return Err(anyhow!("piece length mismatch: {} vs {}", a.len(), b.len()));
            }
            let out: Vec<f64> = a.iter().zip(b.iter()).map(|(x, y)| x.max(*y)).collect();
            Ok(Some(value(out)))
        }),
        // Fully generic: the argument and result split types unify with
        // whatever produces the inputs.
        Annotation::new(
            vec![SplitType::generic("A").into(), SplitType::generic("A").into()],
            Vec::new(),
            Some(SplitType::generic("A")),
        ),
    )
});

/// Elementwise maximum, annotated with generic split types.
pub fn maximum(
    graph: &Arc<TaskGraph>,
    a: impl Into<ArgValue>,
    b: impl Into<ArgValue>,
) -> LazyHandle {
    MAXIMUM.call(graph, vec![a.into(), b.into()])
}
