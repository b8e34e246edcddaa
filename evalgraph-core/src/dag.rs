// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Operator DAG with layered topological execution
//!
//! Nodes live in an arena indexed by insertion position. A symbol table maps every
//! declared output column to the node that produces it, so wiring is validated by
//! [`OperatorDag::resolve`] before any operator runs.
//!
//! Execution walks the plan layer by layer (Kahn's algorithm). Operators within
//! a layer are independent and run concurrently; the work they do draws from the
//! run's permit pool, so `Settings::concurrency_limit` bounds it as a whole. Their
//! outputs are merged into the running dataset in insertion order.

use crate::cache::{CacheKey, CachedResult, ResultCache};
use crate::dataset::Dataset;
use crate::error::{EvalGraphError, OperatorError, Result};
use crate::operator::{Operator, OperatorDescriptor, OperatorKind, OperatorOutput, RunContext};
use crate::registry::OperatorRegistry;
use crate::settings::Settings;
use crate::signal::Signal;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Column carrying per-row failure details under [`FailurePolicy::SkipRow`]
pub const ERRORS_COLUMN: &str = "_errors";

pub type NodeIndex = usize;

/// How runtime failures are handled for a whole execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort on the first failure, reporting operator and row
    #[default]
    FailFast,
    /// Null the failed cells, record the failure in `_errors` and continue
    SkipRow,
}

impl std::str::FromStr for FailurePolicy {
    type Err = EvalGraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fail-fast" | "fail_fast" => Ok(FailurePolicy::FailFast),
            "skip-row" | "skip_row" => Ok(FailurePolicy::SkipRow),
            other => Err(EvalGraphError::Configuration(format!(
                "Unknown failure policy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub policy: FailurePolicy,
    pub cancel: CancellationToken,
    /// Permit pool shared with sibling runs; a fresh pool sized by
    /// `Settings::concurrency_limit` when absent
    pub permits: Option<Arc<Semaphore>>,
}

impl RunOptions {
    pub fn with_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.permits = Some(permits);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A row skipped under [`FailurePolicy::SkipRow`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row: usize,
    pub operator: String,
    pub message: String,
}

/// Outcome of a DAG execution
#[derive(Debug, Clone)]
pub struct DagRun {
    pub dataset: Dataset,
    /// False when the run was cancelled before every operator ran
    pub complete: bool,
    pub operators_run: usize,
    pub skipped_rows: Vec<RowFailure>,
}

/// Topological execution layers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub layers: Vec<Vec<NodeIndex>>,
}

impl ExecutionPlan {
    pub fn order(&self) -> Vec<NodeIndex> {
        self.layers.iter().flatten().copied().collect()
    }
}

/// Serialized node: enough to rebuild the operator and check its wiring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    #[serde(default)]
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub output_names: Vec<String>,
    #[serde(default)]
    pub input_signals: Vec<Signal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagDocument {
    pub operators: Vec<NodeDescriptor>,
}

struct Node {
    name: String,
    op: Box<dyn Operator>,
    inputs: Vec<Signal>,
    outputs: Vec<String>,
}

impl Node {
    fn input_columns(&self) -> Vec<String> {
        self.inputs.iter().map(|s| s.column.clone()).collect()
    }
}

enum Binding {
    Node(NodeIndex),
    Initial,
}

#[derive(Default)]
pub struct OperatorDag {
    nodes: Vec<Node>,
    /// column name -> producing node
    producers: HashMap<String, NodeIndex>,
    names: HashMap<String, NodeIndex>,
    cache: Option<Arc<ResultCache>>,
}

impl OperatorDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay results from `cache` for operators whose configuration and inputs
    /// were seen before
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn set_cache(&mut self, cache: Option<Arc<ResultCache>>) {
        self.cache = cache;
    }

    /// Add a node named `{type_name}_{position}`
    pub fn add(&mut self, op: Box<dyn Operator>) -> Result<NodeIndex> {
        let name = format!("{}_{}", op.type_name(), self.nodes.len());
        self.add_named(name, op)
    }

    pub fn add_named(&mut self, name: impl Into<String>, op: Box<dyn Operator>) -> Result<NodeIndex> {
        let inputs = op.input_signals();
        self.insert(name.into(), op, inputs)
    }

    fn insert(&mut self, name: String, op: Box<dyn Operator>, inputs: Vec<Signal>) -> Result<NodeIndex> {
        if let Some(&existing) = self.names.get(&name) {
            return Err(EvalGraphError::NameCollision {
                name: name.clone(),
                existing: self.nodes[existing].name.clone(),
                incoming: name,
            });
        }

        let outputs = op.output_columns();
        let mut own = HashSet::new();
        for column in &outputs {
            if column == ERRORS_COLUMN {
                return Err(EvalGraphError::NameCollision {
                    name: column.clone(),
                    existing: "<failure policy>".to_string(),
                    incoming: name,
                });
            }
            if let Some(&producer) = self.producers.get(column) {
                return Err(EvalGraphError::NameCollision {
                    name: column.clone(),
                    existing: self.nodes[producer].name.clone(),
                    incoming: name,
                });
            }
            if !own.insert(column.as_str()) {
                return Err(EvalGraphError::NameCollision {
                    name: column.clone(),
                    existing: name.clone(),
                    incoming: name,
                });
            }
        }

        let idx = self.nodes.len();
        for column in &outputs {
            self.producers.insert(column.clone(), idx);
        }
        self.names.insert(name.clone(), idx);
        debug!("Added node {} producing {:?}", name, outputs);

        self.nodes.push(Node {
            name,
            op,
            inputs,
            outputs,
        });
        Ok(idx)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn node_index(&self, name: &str) -> Option<NodeIndex> {
        self.names.get(name).copied()
    }

    /// Node producing `column`, if any
    pub fn producer_of(&self, column: &str) -> Option<&str> {
        self.producers
            .get(column)
            .map(|&idx| self.nodes[idx].name.as_str())
    }

    /// Every declared output column, in insertion order
    pub fn output_columns(&self) -> Vec<String> {
        self.nodes.iter().flat_map(|n| n.outputs.clone()).collect()
    }

    pub fn descriptors(&self) -> Vec<OperatorDescriptor> {
        self.nodes.iter().map(|n| n.op.descriptor()).collect()
    }

    fn bind(&self, signal: &Signal, initial: &HashSet<&str>) -> Option<Binding> {
        match &signal.producer {
            Some(producer) => {
                let idx = *self.names.get(producer)?;
                self.nodes[idx]
                    .outputs
                    .contains(&signal.column)
                    .then_some(Binding::Node(idx))
            }
            None => self
                .producers
                .get(&signal.column)
                .map(|&idx| Binding::Node(idx))
                .or_else(|| initial.contains(signal.column.as_str()).then_some(Binding::Initial)),
        }
    }

    /// Compute execution layers against a dataset carrying `initial_columns`.
    ///
    /// A signal binds to the node declaring its column first, then to the initial
    /// dataset; an initial column that some node also declares is a stale result
    /// and will be recomputed. Sinks always form the last layer.
    pub fn resolve(&self, initial_columns: &[String]) -> Result<ExecutionPlan> {
        let initial: HashSet<&str> = initial_columns.iter().map(String::as_str).collect();
        let n = self.nodes.len();
        let mut dependents: Vec<Vec<NodeIndex>> = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];

        // Build edges
        for (idx, node) in self.nodes.iter().enumerate() {
            let mut deps: Vec<NodeIndex> = Vec::new();
            for signal in &node.inputs {
                match self.bind(signal, &initial) {
                    Some(Binding::Node(producer)) => {
                        if self.nodes[producer].op.kind() == OperatorKind::Sink {
                            return Err(EvalGraphError::UnresolvedSignal {
                                operator: node.name.clone(),
                                signal: signal.to_string(),
                            });
                        }
                        if !deps.contains(&producer) {
                            deps.push(producer);
                        }
                    }
                    Some(Binding::Initial) => {}
                    None => {
                        return Err(EvalGraphError::UnresolvedSignal {
                            operator: node.name.clone(),
                            signal: signal.to_string(),
                        })
                    }
                }
            }
            for producer in deps {
                dependents[producer].push(idx);
                in_degree[idx] += 1;
            }
        }

        // Kahn's algorithm, one layer at a time
        let mut layers: Vec<Vec<NodeIndex>> = Vec::new();
        let mut current: Vec<NodeIndex> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0;

        while !current.is_empty() {
            visited += current.len();
            let mut next = Vec::new();
            for &idx in &current {
                for &dependent in &dependents[idx] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            layers.push(current);
            current = next;
        }

        // Check for cycles
        if visited != n {
            let nodes = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.nodes[i].name.clone())
                .collect();
            return Err(EvalGraphError::CyclicDependency { nodes });
        }

        let mut sinks = Vec::new();
        for layer in &mut layers {
            layer.retain(|&idx| {
                let is_sink = self.nodes[idx].op.kind() == OperatorKind::Sink;
                if is_sink {
                    sinks.push(idx);
                }
                !is_sink
            });
        }
        layers.retain(|layer| !layer.is_empty());
        if !sinks.is_empty() {
            sinks.sort_unstable();
            layers.push(sinks);
        }

        debug!("Resolved {} operators into {} layers", n, layers.len());
        Ok(ExecutionPlan { layers })
    }

    /// Execute with the default fail-fast policy
    pub async fn execute(&mut self, dataset: &Dataset, settings: Arc<Settings>) -> Result<DagRun> {
        self.execute_with(dataset, settings, &RunOptions::default())
            .await
    }

    /// Resolve, set up every operator, then run the plan layer by layer.
    ///
    /// Structural and configuration errors are raised before any row is processed.
    pub async fn execute_with(
        &mut self,
        dataset: &Dataset,
        settings: Arc<Settings>,
        options: &RunOptions,
    ) -> Result<DagRun> {
        settings.validate()?;
        let plan = self.resolve(dataset.columns())?;

        for node in &mut self.nodes {
            node.op.setup(&settings)?;
        }

        let mut ctx = RunContext::new(Arc::clone(&settings)).with_cancel(options.cancel.clone());
        if let Some(permits) = &options.permits {
            ctx = ctx.with_permits(Arc::clone(permits));
        }
        let cache = if settings.cache_enabled {
            self.cache.clone()
        } else {
            None
        };
        let this = &*self;

        info!(
            "Executing DAG: {} operators in {} layers over {} rows",
            this.nodes.len(),
            plan.layers.len(),
            dataset.num_rows()
        );

        let mut current = dataset.clone();
        let mut complete = true;
        let mut operators_run = 0;
        let mut failures: Vec<RowFailure> = Vec::new();

        for layer in &plan.layers {
            if ctx.is_cancelled() {
                complete = false;
                break;
            }

            // sinks persist the same schema the run returns
            let sink_layer = layer
                .iter()
                .all(|&idx| this.nodes[idx].op.kind() == OperatorKind::Sink);
            if sink_layer && options.policy == FailurePolicy::SkipRow {
                current = current.with_column(ERRORS_COLUMN, error_column(current.num_rows(), &failures))?;
            }

            let input = &current;
            let ctx_ref = &ctx;
            let cache_ref = cache.as_deref();
            let results: Vec<(NodeIndex, Option<std::result::Result<OperatorOutput, OperatorError>>)> =
                stream::iter(layer.iter().copied())
                    .map(|idx| async move {
                        // in-flight operators finish; nothing new starts after cancellation
                        if ctx_ref.is_cancelled() {
                            return (idx, None);
                        }
                        (idx, Some(this.invoke(idx, input, ctx_ref, cache_ref).await))
                    })
                    .buffered(settings.concurrency_limit)
                    .collect()
                    .await;

            let mut next = current.clone();
            for (idx, result) in results {
                let node = &this.nodes[idx];
                let Some(result) = result else {
                    complete = false;
                    continue;
                };

                match result {
                    Ok(output) => {
                        operators_run += 1;
                        if let Some(first) = output.row_errors.first() {
                            if options.policy == FailurePolicy::FailFast {
                                error!("Operator {} failed at row {}: {}", node.name, first.row, first.message);
                                return Err(EvalGraphError::OperatorRuntime {
                                    operator: node.name.clone(),
                                    row: Some(first.row),
                                    message: first.message.clone(),
                                });
                            }
                            for e in output.row_errors.iter() {
                                warn!("Skipping row {} in {}: {}", e.row, node.name, e.message);
                                failures.push(RowFailure {
                                    row: e.row,
                                    operator: node.name.clone(),
                                    message: e.message.clone(),
                                });
                            }
                        }
                        next = next.with_columns_from(&output.dataset, &node.outputs)?;
                    }
                    Err(e) => {
                        let attributable = options.policy == FailurePolicy::SkipRow
                            && node.op.kind() != OperatorKind::Source
                            && next.num_rows() > 0;
                        if !attributable {
                            error!("Operator {} failed: {}", node.name, e);
                            return Err(EvalGraphError::OperatorRuntime {
                                operator: node.name.clone(),
                                row: e.row(),
                                message: e.to_string(),
                            });
                        }

                        warn!("Operator {} failed on every row: {}", node.name, e);
                        let rows = next.num_rows();
                        for column in &node.outputs {
                            next = next.with_column(column.clone(), vec![Value::Null; rows])?;
                        }
                        failures.extend((0..rows).map(|row| RowFailure {
                            row,
                            operator: node.name.clone(),
                            message: e.to_string(),
                        }));
                    }
                }
            }
            current = next;
        }

        if !complete {
            warn!(
                "Run cancelled: {} of {} operators completed",
                operators_run,
                this.nodes.len()
            );
        }

        if options.policy == FailurePolicy::SkipRow {
            current = current.with_column(ERRORS_COLUMN, error_column(current.num_rows(), &failures))?;
        }

        info!(
            "DAG finished: {} operators run, {} rows skipped",
            operators_run,
            failures.len()
        );

        Ok(DagRun {
            dataset: current,
            complete,
            operators_run,
            skipped_rows: failures,
        })
    }

    async fn invoke(
        &self,
        idx: NodeIndex,
        input: &Dataset,
        ctx: &RunContext,
        cache: Option<&ResultCache>,
    ) -> std::result::Result<OperatorOutput, OperatorError> {
        let node = &self.nodes[idx];
        let start = Instant::now();

        let key = match cache {
            Some(_) if node.op.cacheable() => Some(CacheKey::new(
                &node.op.descriptor(),
                input,
                &node.input_columns(),
            )?),
            _ => None,
        };

        if let (Some(cache), Some(key)) = (cache, &key) {
            if let Some(hit) = cache.get(key).await {
                debug!("Cache hit for {}", node.name);
                let dataset = hit.replay(input)?;
                return Ok(OperatorOutput::new(dataset, hit.column_names())
                    .with_row_errors(hit.row_errors.clone()));
            }
        }

        debug!("Running operator {} over {} rows", node.name, input.num_rows());
        // transforms are bounded and timed per row by `run_rows`
        let output = match node.op.kind() {
            OperatorKind::Transform => node.op.run(input, ctx).await?,
            OperatorKind::Source | OperatorKind::Sink => {
                let _permit = ctx.acquire().await?;
                tokio::time::timeout(ctx.settings.timeout(), node.op.run(input, ctx))
                    .await
                    .map_err(|_| OperatorError::Timeout)??
            }
        };

        if node.op.kind() != OperatorKind::Source && output.dataset.num_rows() != input.num_rows() {
            return Err(OperatorError::Other(format!(
                "row count changed from {} to {}",
                input.num_rows(),
                output.dataset.num_rows()
            )));
        }
        if let Some(missing) = node.outputs.iter().find(|c| !output.dataset.has_column(c)) {
            return Err(OperatorError::Other(format!(
                "declared output column '{}' was not produced",
                missing
            )));
        }

        // Only clean results are cached so transient row failures are retried
        if let (Some(cache), Some(key)) = (cache, key) {
            if output.row_errors.is_empty() {
                if let Some(entry) = CachedResult::capture(&output.dataset, &node.outputs, Vec::new()) {
                    cache.set(key, entry).await;
                }
            }
        }

        info!(
            "Operator {} finished in {:?} ({} row errors)",
            node.name,
            start.elapsed(),
            output.row_errors.len()
        );
        Ok(output)
    }

    // --- Documents ---

    pub fn to_document(&self) -> DagDocument {
        DagDocument {
            operators: self
                .nodes
                .iter()
                .map(|node| {
                    let descriptor = node.op.descriptor();
                    NodeDescriptor {
                        name: node.name.clone(),
                        type_name: descriptor.type_name,
                        parameters: descriptor.parameters,
                        output_names: node.outputs.clone(),
                        input_signals: node.inputs.clone(),
                    }
                })
                .collect(),
        }
    }

    /// Rebuild a DAG through `registry`.
    ///
    /// Declared `output_names` must match what the rebuilt operator produces.
    /// Declared `input_signals` may pin producers for some of the operator's own
    /// input columns; inputs not mentioned keep their default binding.
    pub fn from_document(document: &DagDocument, registry: &OperatorRegistry) -> Result<Self> {
        let mut dag = OperatorDag::new();

        for node in &document.operators {
            let op = registry.deserialize(&OperatorDescriptor::new(
                node.type_name.clone(),
                node.parameters.clone(),
            ))?;

            let outputs = op.output_columns();
            if !node.output_names.is_empty() && node.output_names != outputs {
                return Err(EvalGraphError::InvalidParameters {
                    type_name: node.type_name.clone(),
                    message: format!(
                        "declared outputs {:?} do not match operator outputs {:?}",
                        node.output_names, outputs
                    ),
                });
            }

            // declared signals rebind the operator's own inputs by column; the rest stay
            let mut inputs = op.input_signals();
            for pinned in &node.input_signals {
                match inputs.iter_mut().find(|own| own.column == pinned.column) {
                    Some(own) => *own = pinned.clone(),
                    None => {
                        return Err(EvalGraphError::InvalidParameters {
                            type_name: node.type_name.clone(),
                            message: format!("operator does not consume signal '{}'", pinned),
                        })
                    }
                }
            }

            let name = if node.name.is_empty() {
                format!("{}_{}", op.type_name(), dag.len())
            } else {
                node.name.clone()
            };
            dag.insert(name, op, inputs)?;
        }

        Ok(dag)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn from_json(json: &str, registry: &OperatorRegistry) -> Result<Self> {
        let document: DagDocument = serde_json::from_str(json)?;
        Self::from_document(&document, registry)
    }
}

fn error_column(rows: usize, failures: &[RowFailure]) -> Vec<Value> {
    let mut per_row: Vec<Map<String, Value>> = vec![Map::new(); rows];
    for failure in failures {
        if let Some(entry) = per_row.get_mut(failure.row) {
            entry.insert(failure.operator.clone(), Value::String(failure.message.clone()));
        }
    }
    per_row
        .into_iter()
        .map(|m| if m.is_empty() { Value::Null } else { Value::Object(m) })
        .collect()
}
