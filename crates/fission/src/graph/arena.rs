//! Context-scoped task graph orchestrating registration and evaluation.

use std::collections::{HashSet, VecDeque};
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};

use super::handle::LazyHandle;
use super::infer;
use super::state::{ArgValue, GraphInner, NodeId, NodeState, OpNode};
use crate::annotation::Annotation;
use crate::driver::{Driver, ExecConfig};
use crate::profiling::{self, Phase};
use crate::program::{compile_pipelines, Program, SlotSource};
use crate::value::{Kernel, Value};

/// Dataflow graph of deferred annotated calls.
///
/// Graphs are explicit, context-scoped objects: construct one, share it via
/// `Arc`, and register calls against it. Evaluation is triggered explicitly
/// through [`TaskGraph::evaluate`] or implicitly when any handle's value is
/// read; afterwards the root set is cleared so subsequent registrations start
/// a fresh graph.
pub struct TaskGraph {
    config: ExecConfig,
    inner: Mutex<GraphInner>,
}

impl TaskGraph {
    /// Creates a graph evaluating with the default [`ExecConfig`].
    pub fn new() -> Arc<Self> {
        Self::with_config(ExecConfig::default())
    }

    /// Creates a graph evaluating with the provided configuration.
    pub fn with_config(config: ExecConfig) -> Arc<Self> {
        Arc::new(TaskGraph {
            config,
            inner: Mutex::new(GraphInner::new()),
        })
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Registers a function invocation along with its annotation and returns
    /// a lazy handle to the deferred result.
    ///
    /// The annotation is cloned so generic resolution never leaks between
    /// calls. The new node records as children every existing node it
    /// depends on, either because an argument is that node's result or
    /// because that node mutates a value this call also receives.
    pub fn register(
        self: &Arc<Self>,
        name: &'static str,
        kernel: Kernel,
        args: Vec<ArgValue>,
        kwargs: Vec<(String, ArgValue)>,
        annotation: &Annotation,
    ) -> LazyHandle {
        let mut annotation = annotation.clone();
        annotation.fill_default_kwargs(kwargs.iter().map(|(name, _)| name.as_str()));

        let mut inner = self.inner.lock().expect("task graph poisoned");
        let id = NodeId(inner.nodes.len() as u32);
        inner.nodes.push(OpNode {
            name,
            kernel,
            args,
            kwargs,
            annotation,
            state: NodeState::Unevaluated,
            pipeline: 0,
            root: true,
            send_result: true,
            children: Vec::new(),
        });

        // Wire the new node: breadth-first from the current roots, recording
        // the first dependency found along each path and not descending past
        // it, so only the highest dependency becomes a child.
        let mut children = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeId> = inner.roots.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if inner.is_dependency(current, id) {
                children.push(current);
                continue;
            }
            queue.extend(inner.node(current).children.iter().copied());
        }
        for child in &children {
            inner.node_mut(*child).root = false;
        }
        inner.node_mut(id).children = children;

        // Any root the new node depends on is displaced in its favor.
        let retained: Vec<NodeId> = inner
            .roots
            .iter()
            .copied()
            .filter(|root| !inner.is_dependency(*root, id))
            .collect();
        inner.roots = retained;
        inner.roots.push(id);
        drop(inner);

        LazyHandle::new(Arc::clone(self), id)
    }

    pub(crate) fn set_send_result(&self, node: NodeId, send: bool) {
        let mut inner = self.inner.lock().expect("task graph poisoned");
        inner.node_mut(node).send_result = send;
    }

    /// Evaluates every pending operation with the graph's configuration.
    pub fn evaluate(self: &Arc<Self>) -> Result<()> {
        let config = self.config.clone();
        self.evaluate_with(&config)
    }

    /// Evaluates every pending operation.
    ///
    /// Pipelines run in dependency order; each pipeline's outputs are
    /// committed before the next one starts so later pipelines can split
    /// them. The root set is cleared afterwards. On failure the graph being
    /// evaluated aborts, but commits from pipelines that already completed
    /// remain valid.
    pub fn evaluate_with(&self, config: &ExecConfig) -> Result<()> {
        config.validate()?;
        let mut inner = self.inner.lock().expect("task graph poisoned");
        if inner.roots.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        infer::infer_types(&mut inner).context("split type inference failed")?;
        profiling::add_phase_time(Phase::Inference, started.elapsed());

        let started = Instant::now();
        let programs = compile_pipelines(&inner);
        profiling::add_phase_time(Phase::Compile, started.elapsed());

        let driver = Driver::new(config);
        for (pipeline, program) in &programs {
            let slot_values = resolve_slot_values(&inner, program);
            let results = driver
                .run(program, &slot_values)
                .with_context(|| format!("pipeline {pipeline} failed"))?;
            commit(&mut inner, program, results);
        }

        inner.roots.clear();
        if config.profile {
            log::info!("evaluation profile: {}", profiling::report());
        }
        Ok(())
    }

    /// The node's output, evaluating the owning graph on first access.
    pub(crate) fn materialize(self: &Arc<Self>, node: NodeId) -> Result<Option<Value>> {
        {
            let inner = self.inner.lock().expect("task graph poisoned");
            if let NodeState::Evaluated(value) = &inner.node(node).state {
                return Ok(value.clone());
            }
        }
        self.evaluate()?;
        let inner = self.inner.lock().expect("task graph poisoned");
        match &inner.node(node).state {
            NodeState::Evaluated(value) => Ok(value.clone()),
            NodeState::Unevaluated => Err(anyhow!(
                "operation `{}` was not materialized by evaluation",
                inner.node(node).name
            )),
        }
    }

    /// Runs inference and lowering without executing anything, returning the
    /// per-pipeline program listings. Useful for diagnosing pipeline breaks.
    pub fn explain(&self) -> Result<String> {
        let mut inner = self.inner.lock().expect("task graph poisoned");
        if inner.roots.is_empty() {
            return Ok(String::new());
        }
        infer::infer_types(&mut inner).context("split type inference failed")?;
        let programs = compile_pipelines(&inner);
        let mut out = String::new();
        for (pipeline, program) in &programs {
            let _ = writeln!(out, "pipeline {pipeline}:");
            let _ = write!(out, "{program}");
        }
        Ok(out)
    }

    /// Current root nodes (operations nothing depends on yet).
    pub fn roots(&self) -> Vec<NodeId> {
        self.inner.lock().expect("task graph poisoned").roots.clone()
    }

    /// Dependencies recorded for a node.
    pub fn children_of(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .lock()
            .expect("task graph poisoned")
            .node(node)
            .children
            .clone()
    }

    /// The pipeline a node was assigned by the most recent inference run.
    pub fn pipeline_of(&self, node: NodeId) -> usize {
        self.inner
            .lock()
            .expect("task graph poisoned")
            .node(node)
            .pipeline
    }

    /// Whether no registered node depends on this one yet.
    pub fn is_root(&self, node: NodeId) -> bool {
        self.inner
            .lock()
            .expect("task graph poisoned")
            .node(node)
            .root
    }
}

impl fmt::Display for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().expect("task graph poisoned");
        for root in &inner.roots {
            fmt_node(&inner, *root, 0, f)?;
        }
        Ok(())
    }
}

fn fmt_node(
    inner: &GraphInner,
    id: NodeId,
    depth: usize,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    let node = inner.node(id);
    writeln!(
        f,
        "{}{} {}(...) (pipeline {})",
        "  ".repeat(depth),
        node.annotation,
        node.name,
        node.pipeline
    )?;
    for child in &node.children {
        fmt_node(inner, *child, depth + 1, f)?;
    }
    Ok(())
}

/// Binds each program slot to its current value: registered data directly,
/// node slots from committed outputs. Slots produced by the program itself
/// start empty.
fn resolve_slot_values(inner: &GraphInner, program: &Program) -> Vec<Option<Value>> {
    program
        .slots()
        .iter()
        .map(|source| match source {
            SlotSource::Data(value) => Some(value.clone()),
            SlotSource::Node(id) => match &inner.node(*id).state {
                NodeState::Evaluated(value) => value.clone(),
                NodeState::Unevaluated => None,
            },
        })
        .collect()
}

/// Writes a program's merged results back onto the graph nodes its slots
/// reference.
fn commit(inner: &mut GraphInner, program: &Program, results: Vec<Option<Value>>) {
    for (slot, source) in program.slots().iter().enumerate() {
        if let SlotSource::Node(id) = source {
            inner.node_mut(*id).state = NodeState::Evaluated(results[slot].clone());
        }
    }
}
