//! Graph construction: dependency wiring, root tracking, pipeline
//! assignment, and program lowering.

use anyhow::Result;

use fission::split::SplitResult;
use fission::{
    kernel, mutated, value, Annotated, Annotation, ArgValue, Elements, SplitApi, SplitChunk,
    SplitType, SplitTypeError, TaskGraph, Value,
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

/// Same storage as RowSplit but a distinct strategy, so syncing the two is a
/// type mismatch.
#[derive(Debug, Clone, Copy)]
struct ColSplit;

impl SplitApi for ColSplit {
    fn name(&self) -> &'static str {
        "ColSplit"
    }

    fn split(&self, start: usize, end: usize, value: &Value) -> SplitResult<SplitChunk> {
        RowSplit.split(start, end, value)
    }

    fn combine(&self, pieces: Vec<Value>) -> SplitResult<Option<Value>> {
        RowSplit.combine(pieces)
    }

    fn elements(&self, value: &Value) -> SplitResult<Elements> {
        RowSplit.elements(value)
    }
}

fn rows(value: &Value) -> SplitResult<&Vec<i64>> {
    value
        .downcast_ref::<Vec<i64>>()
        .ok_or_else(|| SplitTypeError::execution("expected a Vec<i64> value"))
}

/// Unary pass-through with the given argument/return split type.
fn pass_through(name: &'static str, ty: SplitType) -> Annotated {
    Annotated::new(
        name,
        kernel(|call| Ok(Some(call.args[0].clone()))),
        Annotation::new(vec![ty.clone().into()], Vec::new(), Some(ty)),
    )
}

/// Void operation marked as mutating its only argument.
fn mutator(name: &'static str) -> Annotated {
    Annotated::new(
        name,
        kernel(|_| Ok(None)),
        Annotation::new(
            vec![mutated(SplitType::extension(RowSplit))],
            Vec::new(),
            None,
        ),
    )
}

#[test]
fn direct_use_wires_a_dependency_edge() {
    let graph = TaskGraph::new();
    let data: Value = value(vec![1i64, 2, 3]);
    let op = pass_through("id", SplitType::extension(RowSplit));

    let first = op.call(&graph, vec![ArgValue::Data(data.clone())]);
    let second = op.call(&graph, vec![(&first).into()]);

    assert_eq!(graph.roots(), vec![second.node_id()]);
    assert_eq!(graph.children_of(second.node_id()), vec![first.node_id()]);
    assert!(!graph.is_root(first.node_id()));
    assert!(graph.is_root(second.node_id()));
}

#[test]
fn mutation_aliasing_wires_edges_without_data_flow() {
    let graph = TaskGraph::new();
    let buffer: Value = value(vec![1i64; 8]);
    let touch = mutator("touch");

    let first = touch.call(&graph, vec![ArgValue::Data(buffer.clone())]);
    let second = touch.call(&graph, vec![ArgValue::Data(buffer.clone())]);
    let reader = pass_through("read", SplitType::extension(RowSplit))
        .call(&graph, vec![ArgValue::Data(buffer.clone())]);

    assert_eq!(graph.children_of(second.node_id()), vec![first.node_id()]);
    // The reader sees only the most recent mutator as its dependency.
    assert_eq!(graph.children_of(reader.node_id()), vec![second.node_id()]);
    assert_eq!(graph.roots(), vec![reader.node_id()]);
}

#[test]
fn unrelated_operations_stay_roots() {
    let graph = TaskGraph::new();
    let op = pass_through("id", SplitType::extension(RowSplit));
    let first = op.call(&graph, vec![ArgValue::Data(value(vec![1i64]))]);
    let second = op.call(&graph, vec![ArgValue::Data(value(vec![2i64]))]);

    assert_eq!(graph.roots(), vec![first.node_id(), second.node_id()]);
    assert!(graph.children_of(second.node_id()).is_empty());
}

#[test]
fn type_mismatch_starts_a_new_pipeline() -> Result<()> {
    let graph = TaskGraph::new();
    let rows_op = pass_through("rows", SplitType::extension(RowSplit));
    let cols_op = pass_through("cols", SplitType::extension(ColSplit));

    let first = rows_op.call(&graph, vec![ArgValue::Data(value(vec![1i64, 2]))]);
    let second = cols_op.call(&graph, vec![(&first).into()]);

    let listing = graph.explain()?;
    assert_eq!(graph.pipeline_of(first.node_id()), 0);
    assert_eq!(graph.pipeline_of(second.node_id()), 1);
    assert!(listing.contains("pipeline 0:"));
    assert!(listing.contains("pipeline 1:"));
    Ok(())
}

#[test]
fn compatible_chain_shares_one_pipeline() -> Result<()> {
    let graph = TaskGraph::new();
    let op = pass_through("id", SplitType::extension(RowSplit));
    let data: Value = value(vec![1i64, 2, 3]);

    let mut handle = op.call(&graph, vec![ArgValue::Data(data.clone())]);
    for _ in 0..3 {
        handle = op.call(&graph, vec![(&handle).into()]);
    }

    let listing = graph.explain()?;
    assert_eq!(graph.pipeline_of(handle.node_id()), 0);
    assert!(!listing.contains("pipeline 1:"));
    assert!(listing.contains("= split"));
    assert!(listing.contains("= call id("));
    Ok(())
}

#[test]
fn pipeline_assignment_is_deterministic() -> Result<()> {
    let build = || -> Result<String> {
        let graph = TaskGraph::new();
        let rows_op = pass_through("rows", SplitType::extension(RowSplit));
        let cols_op = pass_through("cols", SplitType::extension(ColSplit));
        let data: Value = value(vec![1i64, 2, 3, 4]);

        let a = rows_op.call(&graph, vec![ArgValue::Data(data.clone())]);
        let b = cols_op.call(&graph, vec![(&a).into()]);
        let _c = rows_op.call(&graph, vec![(&b).into()]);
        graph.explain()
    };

    assert_eq!(build()?, build()?);
    Ok(())
}

#[test]
fn generics_resolve_from_the_producing_child() -> Result<()> {
    let graph = TaskGraph::new();
    let rows_op = pass_through("rows", SplitType::extension(RowSplit));
    let generic_op = Annotated::new(
        "merge",
        kernel(|call| Ok(Some(call.args[0].clone()))),
        Annotation::new(
            vec![SplitType::generic("A").into(), SplitType::generic("A").into()],
            Vec::new(),
            Some(SplitType::generic("A")),
        ),
    );

    let produced = rows_op.call(&graph, vec![ArgValue::Data(value(vec![1i64, 2]))]);
    let merged = generic_op.call(
        &graph,
        vec![(&produced).into(), ArgValue::Data(value(vec![3i64, 4]))],
    );

    let listing = graph.explain()?;
    // Everything unified to RowSplit: one pipeline, no generic names left.
    assert_eq!(graph.pipeline_of(merged.node_id()), 0);
    assert!(listing.contains("RowSplit"));
    assert!(!listing.contains("A<"));
    Ok(())
}

#[test]
fn unresolved_generics_fail_inference() {
    let graph = TaskGraph::new();
    let generic_op = Annotated::new(
        "merge",
        kernel(|call| Ok(Some(call.args[0].clone()))),
        Annotation::new(
            vec![SplitType::generic("A").into(), SplitType::generic("A").into()],
            Vec::new(),
            Some(SplitType::generic("A")),
        ),
    );

    let handle = generic_op.call(
        &graph,
        vec![
            ArgValue::Data(value(vec![1i64])),
            ArgValue::Data(value(vec![2i64])),
        ],
    );

    let err = handle.value().unwrap_err();
    assert!(err.to_string().contains("inference failed"), "{err:#}");
}
