//! Evaluation semantics: lazy triggering, memoization, dependency ordering,
//! merge behavior, and failure handling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use fission::split::SplitResult;
use fission::{
    kernel, mutated, value, Annotated, Annotation, ArgValue, Elements, ExecConfig, SplitApi,
    SplitChunk, SplitType, SplitTypeError, TaskGraph, Value,
};

#[derive(Debug, Clone, Copy)]
struct RowSplit;

impl SplitApi for RowSplit {
    fn name(&self) -> &'static str {
        "RowSplit"
    }

    fn split(&self, start: usize, end: usize, value: &Value) -> SplitResult<SplitChunk> {
        let data = rows(value)?;
        if start >= data.len() {
            return Ok(SplitChunk::Stop);
        }
        let end = end.min(data.len());
        Ok(SplitChunk::Piece(fission::value(data[start..end].to_vec())))
    }

    fn combine(&self, pieces: Vec<Value>) -> SplitResult<Option<Value>> {
        let mut merged = Vec::new();
        for piece in &pieces {
            merged.extend_from_slice(rows(piece)?);
        }
        Ok(Some(fission::value(merged)))
    }

    fn elements(&self, value: &Value) -> SplitResult<Elements> {
        Ok(Elements::Count(rows(value)?.len()))
    }
}

fn rows(value: &Value) -> SplitResult<&Vec<i64>> {
    value
        .downcast_ref::<Vec<i64>>()
        .ok_or_else(|| SplitTypeError::execution("expected a Vec<i64> value"))
}

fn row_type() -> SplitType {
    SplitType::extension(RowSplit)
}

/// Pass-through over rows that counts kernel invocations.
fn counting_op(name: &'static str, calls: Arc<AtomicUsize>) -> Annotated {
    Annotated::new(
        name,
        kernel(move |call| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(call.args[0].clone()))
        }),
        Annotation::new(vec![row_type().into()], Vec::new(), Some(row_type())),
    )
}

#[test]
fn reading_a_handle_evaluates_the_graph_once() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let graph = TaskGraph::new();
    let op = counting_op("count", Arc::clone(&calls));
    let data: Value = value(vec![1i64, 2, 3]);

    let first = op.call(&graph, vec![ArgValue::Data(data.clone())]);
    let second = op.call(&graph, vec![(&first).into()]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let result = second.value_as::<Vec<i64>>()?;
    assert_eq!(result.as_ref(), &vec![1, 2, 3]);
    // One batch covers the whole input, so each node ran exactly once.
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Both handles are memoized now; no further execution.
    let _ = first.value()?;
    let _ = second.value()?;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn mutators_run_before_later_readers() -> Result<()> {
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let graph = TaskGraph::new();
    let buffer: Value = value(vec![1i64; 4]);

    let record = |tag: &'static str, order: &Arc<Mutex<Vec<&'static str>>>| {
        let order = Arc::clone(order);
        kernel(move |call| {
            order.lock().expect("order poisoned").push(tag);
            Ok(Some(call.args[0].clone()))
        })
    };

    let mutate = Annotated::new(
        "mutate",
        record("mutate", &order),
        Annotation::new(vec![mutated(row_type())], Vec::new(), Some(row_type())),
    );
    let read = Annotated::new(
        "read",
        record("read", &order),
        Annotation::new(vec![row_type().into()], Vec::new(), Some(row_type())),
    );

    let _mutation = mutate.call(&graph, vec![ArgValue::Data(buffer.clone())]);
    let reader = read.call(&graph, vec![ArgValue::Data(buffer.clone())]);

    let _ = reader.value()?;
    assert_eq!(*order.lock().expect("order poisoned"), vec!["mutate", "read"]);
    Ok(())
}

#[test]
fn all_broadcast_programs_run_one_batch() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let graph = TaskGraph::new();
    let op = {
        let calls = Arc::clone(&calls);
        Annotated::new(
            "configure",
            kernel(move |call| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(call.args[0].clone()))
            }),
            Annotation::new(
                vec![SplitType::Broadcast.into()],
                Vec::new(),
                Some(SplitType::Broadcast),
            ),
        )
    };

    let handle = op.call(&graph, vec![ArgValue::Data(value(17i64))]);
    let result = handle.value_as::<i64>()?;
    assert_eq!(*result, 17);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn partition_count_mismatch_is_fatal() {
    let graph = TaskGraph::new();
    let op = Annotated::new(
        "zip",
        kernel(|call| Ok(Some(call.args[0].clone()))),
        Annotation::new(
            vec![row_type().into(), row_type().into()],
            Vec::new(),
            Some(row_type()),
        ),
    );

    let handle = op.call(
        &graph,
        vec![
            ArgValue::Data(value(vec![1i64; 10])),
            ArgValue::Data(value(vec![1i64; 20])),
        ],
    );

    let err = handle.value().unwrap_err();
    assert!(err.to_string().contains("pipeline 0 failed"), "{err:#}");
    assert!(
        format!("{err:#}").contains("disagree on element count"),
        "{err:#}"
    );
}

#[test]
fn worker_failures_abort_the_failing_pipeline_only() -> Result<()> {
    let graph = TaskGraph::new();
    let ok_op = counting_op("fine", Arc::new(AtomicUsize::new(0)));
    let first = ok_op.call(&graph, vec![ArgValue::Data(value(vec![7i64, 8]))]);
    graph.evaluate()?;
    assert_eq!(first.value_as::<Vec<i64>>()?.as_ref(), &vec![7, 8]);

    let failing = Annotated::new(
        "explode",
        kernel(|_| Err(anyhow::anyhow!("bad piece"))),
        Annotation::new(vec![row_type().into()], Vec::new(), Some(row_type())),
    );
    let broken = failing.call(&graph, vec![ArgValue::Data(value(vec![1i64, 2]))]);
    let err = broken.value().unwrap_err();
    assert!(format!("{err:#}").contains("bad piece"), "{err:#}");

    // The earlier evaluation's commit is unaffected.
    assert_eq!(first.value_as::<Vec<i64>>()?.as_ref(), &vec![7, 8]);
    Ok(())
}

#[test]
fn suppressed_results_stay_local_to_the_pipeline() -> Result<()> {
    let graph = TaskGraph::new();
    let op = counting_op("stage", Arc::new(AtomicUsize::new(0)));
    let data: Value = value(vec![5i64, 6, 7]);

    let intermediate = op.call(&graph, vec![ArgValue::Data(data.clone())]);
    intermediate.suppress_send();
    let result = op.call(&graph, vec![(&intermediate).into()]);

    assert_eq!(result.value_as::<Vec<i64>>()?.as_ref(), &vec![5, 6, 7]);
    assert!(intermediate.output()?.is_none());
    Ok(())
}

#[test]
fn results_are_invariant_across_worker_counts() -> Result<()> {
    let source: Vec<i64> = (0..103).collect();
    let expected: Vec<i64> = source.clone();

    for workers in [1usize, 2, 4] {
        let graph = TaskGraph::with_config(ExecConfig {
            workers,
            batch_size: 8,
            ..ExecConfig::default()
        });
        let op = counting_op("chunk", Arc::new(AtomicUsize::new(0)));
        let data: Value = value(source.clone());

        let mut handle = op.call(&graph, vec![ArgValue::Data(data.clone())]);
        handle = op.call(&graph, vec![(&handle).into()]);

        let result = handle.value_as::<Vec<i64>>()?;
        assert_eq!(result.as_ref(), &expected, "workers = {workers}");
    }
    Ok(())
}

#[test]
fn zero_element_inputs_evaluate_to_empty_results() -> Result<()> {
    let graph = TaskGraph::with_config(ExecConfig {
        workers: 2,
        batch_size: 4,
        ..ExecConfig::default()
    });
    let op = counting_op("chunk", Arc::new(AtomicUsize::new(0)));
    let handle = op.call(&graph, vec![ArgValue::Data(value(Vec::<i64>::new()))]);

    let result = handle.value_as::<Vec<i64>>()?;
    assert!(result.is_empty());
    Ok(())
}
