//! Middleware chain construction and ordering.
//!
//! A chain holds stages of one type. Ordering is resolved once, at build
//! time: a directed graph over the declared dependencies is topologically
//! sorted with priority as the tiebreak for unconstrained stages. Bad wiring
//! (duplicate names, unknown references, cycles) fails construction with a
//! configuration error and can never surface during a request.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use corpus_core::{CorpusError, Result};

use super::{OnError, StageRegistration};

/// A stage together with its registration metadata.
pub struct RegisteredStage<S: ?Sized> {
    pub registration: StageRegistration,
    pub stage: Arc<S>,
}

/// Builder for a middleware chain of one stage type.
pub struct ChainBuilder<S: ?Sized> {
    entries: Vec<RegisteredStage<S>>,
    default_timeout: Option<Duration>,
}

impl<S: ?Sized> Default for ChainBuilder<S> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            default_timeout: None,
        }
    }
}

impl<S: ?Sized> ChainBuilder<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout applied to stages that did not declare their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Register a stage. Duplicate identities are rejected.
    pub fn register(mut self, registration: StageRegistration, stage: Arc<S>) -> Result<Self> {
        if self
            .entries
            .iter()
            .any(|e| e.registration.name == registration.name)
        {
            return Err(CorpusError::Configuration(format!(
                "duplicate middleware stage '{}'",
                registration.name
            )));
        }
        self.entries.push(RegisteredStage {
            registration,
            stage,
        });
        Ok(self)
    }

    /// Resolve the execution order and produce the chain.
    pub fn build(mut self) -> Result<MiddlewareChain<S>> {
        if let Some(default) = self.default_timeout {
            for entry in self.entries.iter_mut() {
                entry.registration.timeout.get_or_insert(default);
            }
        }

        let order = resolve_order(&self.entries)?;
        let mut slots: Vec<Option<RegisteredStage<S>>> =
            self.entries.into_iter().map(Some).collect();
        let stages: Vec<RegisteredStage<S>> = order
            .into_iter()
            .map(|i| slots[i].take().expect("each index appears once"))
            .collect();

        debug!(
            stage_count = stages.len(),
            order = ?stages.iter().map(|s| s.registration.name.as_str()).collect::<Vec<_>>(),
            "Middleware chain resolved"
        );

        Ok(MiddlewareChain { stages })
    }
}

/// An ordered, immutable chain of stages of one type.
pub struct MiddlewareChain<S: ?Sized> {
    stages: Vec<RegisteredStage<S>>,
}

impl<S: ?Sized> Default for MiddlewareChain<S> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<S: ?Sized> MiddlewareChain<S> {
    pub fn builder() -> ChainBuilder<S> {
        ChainBuilder::new()
    }

    /// An empty chain; running it is a no-op.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.stages
            .iter()
            .map(|s| s.registration.name.as_str())
            .collect()
    }

    /// Stages in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredStage<S>> {
        self.stages.iter()
    }

    /// The reaction to a failure of `stage`, given the chain type's default.
    pub fn effective_on_error(stage: &RegisteredStage<S>, type_default: OnError) -> OnError {
        stage.registration.on_error.unwrap_or(type_default)
    }
}

/// Topological sort with priority tiebreak.
///
/// `depends_on` and `runs_before` declarations become graph edges; among
/// stages whose dependencies are all satisfied, lower priority runs first
/// (registration order breaks exact ties).
fn resolve_order<S: ?Sized>(entries: &[RegisteredStage<S>]) -> Result<Vec<usize>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut name_to_node: HashMap<&str, NodeIndex> = HashMap::new();
    let mut nodes = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        let node = graph.add_node(i);
        name_to_node.insert(entry.registration.name.as_str(), node);
        nodes.push(node);
    }

    for (i, entry) in entries.iter().enumerate() {
        for dep in &entry.registration.depends_on {
            let from = name_to_node.get(dep.as_str()).ok_or_else(|| {
                CorpusError::Configuration(format!(
                    "stage '{}' depends on unknown stage '{}'",
                    entry.registration.name, dep
                ))
            })?;
            graph.add_edge(*from, nodes[i], ());
        }
        for successor in &entry.registration.runs_before {
            let to = name_to_node.get(successor.as_str()).ok_or_else(|| {
                CorpusError::Configuration(format!(
                    "stage '{}' runs before unknown stage '{}'",
                    entry.registration.name, successor
                ))
            })?;
            graph.add_edge(nodes[i], *to, ());
        }
    }

    // Kahn's algorithm; the ready set is a min-heap on (priority, insertion
    // order) so unconstrained stages come out by priority.
    let mut indegree: HashMap<NodeIndex, usize> = nodes
        .iter()
        .map(|&n| (n, graph.neighbors_directed(n, Direction::Incoming).count()))
        .collect();

    let mut ready: BinaryHeap<Reverse<(i32, usize)>> = BinaryHeap::new();
    for (i, entry) in entries.iter().enumerate() {
        if indegree[&nodes[i]] == 0 {
            ready.push(Reverse((entry.registration.priority, i)));
        }
    }

    let mut order = Vec::with_capacity(entries.len());
    while let Some(Reverse((_, i))) = ready.pop() {
        order.push(i);
        for succ in graph.neighbors_directed(nodes[i], Direction::Outgoing) {
            let d = indegree.get_mut(&succ).expect("known node");
            *d -= 1;
            if *d == 0 {
                let j = graph[succ];
                ready.push(Reverse((entries[j].registration.priority, j)));
            }
        }
    }

    if order.len() != entries.len() {
        let mut stuck: Vec<&str> = entries
            .iter()
            .enumerate()
            .filter(|(i, _)| !order.contains(i))
            .map(|(_, e)| e.registration.name.as_str())
            .collect();
        stuck.sort_unstable();
        return Err(CorpusError::Configuration(format!(
            "dependency cycle among middleware stages: {}",
            stuck.join(", ")
        )));
    }

    Ok(order)
}
