//! Cross-reference store using petgraph::StableDiGraph keyed by object

use std::collections::HashMap;
use std::path::Path;

use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use trac_core::{MemoryConnection, MemoryDatabase, Result};

use crate::model::{ObjectRef, XrefEdge};

/// The cross-reference table: a directed multigraph whose nodes are
/// objects and whose edges are links and relations between them.
#[derive(Clone, Default)]
pub struct XrefGraph {
    inner: StableDiGraph<ObjectRef, XrefEdge>,
    index: HashMap<ObjectRef, NodeIndex>,
}

pub type XrefDatabase = MemoryDatabase<XrefGraph>;
pub type XrefConnection = MemoryConnection<XrefGraph>;

#[derive(Serialize, Deserialize)]
struct GraphSnapshot {
    edges: Vec<XrefEdge>,
}

impl std::fmt::Debug for XrefGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XrefGraph")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .finish()
    }
}

impl XrefGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, obj: &ObjectRef) -> NodeIndex {
        if let Some(&idx) = self.index.get(obj) {
            return idx;
        }
        let idx = self.inner.add_node(obj.clone());
        self.index.insert(obj.clone(), idx);
        idx
    }

    pub fn add_edge(&mut self, edge: XrefEdge) {
        let source = self.node(&edge.source);
        let target = self.node(&edge.target);
        self.inner.add_edge(source, target, edge);
    }

    /// Remove the outgoing edges of `source` accepted by `predicate`.
    /// Returns the number of edges removed.
    pub fn remove_where(
        &mut self,
        source: &ObjectRef,
        predicate: impl Fn(&XrefEdge) -> bool,
    ) -> usize {
        let Some(&idx) = self.index.get(source) else {
            return 0;
        };
        let doomed: Vec<EdgeIndex> = self
            .inner
            .edges_directed(idx, Direction::Outgoing)
            .filter(|edge_ref| predicate(edge_ref.weight()))
            .map(|edge_ref| edge_ref.id())
            .collect();
        let mut targets = Vec::with_capacity(doomed.len());
        for id in &doomed {
            if let Some((_, target)) = self.inner.edge_endpoints(*id) {
                targets.push(target);
            }
            self.inner.remove_edge(*id);
        }
        self.prune(idx);
        for target in targets {
            self.prune(target);
        }
        doomed.len()
    }

    /// Remove the links of one facet of `source`.
    pub fn remove_facet(&mut self, source: &ObjectRef, facet: &str) -> usize {
        self.remove_where(source, |edge| edge.facet == facet)
    }

    /// Remove the outgoing edges of `source` carrying `relation`.
    pub fn remove_relation(&mut self, source: &ObjectRef, relation: &str) -> usize {
        self.remove_where(source, |edge| edge.relation == relation)
    }

    /// Drop a node once no edge touches it.
    fn prune(&mut self, idx: NodeIndex) {
        let connected = self
            .inner
            .edges_directed(idx, Direction::Outgoing)
            .next()
            .is_some()
            || self
                .inner
                .edges_directed(idx, Direction::Incoming)
                .next()
                .is_some();
        if !connected {
            if let Some(obj) = self.inner.remove_node(idx) {
                self.index.remove(&obj);
            }
        }
    }

    fn directed(&self, obj: &ObjectRef, direction: Direction) -> Vec<&XrefEdge> {
        let Some(&idx) = self.index.get(obj) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.inner.edges_directed(idx, direction).collect();
        edges.sort_by_key(|edge_ref| edge_ref.id());
        edges.into_iter().map(|edge_ref| edge_ref.weight()).collect()
    }

    /// Edges originating from `source`.
    pub fn edges_from(&self, source: &ObjectRef) -> Vec<&XrefEdge> {
        self.directed(source, Direction::Outgoing)
    }

    /// Edges pointing at `target`.
    pub fn edges_to(&self, target: &ObjectRef) -> Vec<&XrefEdge> {
        self.directed(target, Direction::Incoming)
    }

    /// Objects reached from `source` through `relation`.
    pub fn targets(&self, source: &ObjectRef, relation: &str) -> Vec<&ObjectRef> {
        self.edges_from(source)
            .into_iter()
            .filter(|edge| edge.relation == relation)
            .map(|edge| &edge.target)
            .collect()
    }

    pub fn has_incoming(&self, obj: &ObjectRef) -> bool {
        self.index.get(obj).is_some_and(|&idx| {
            self.inner
                .edges_directed(idx, Direction::Incoming)
                .next()
                .is_some()
        })
    }

    pub fn all_edges(&self) -> impl Iterator<Item = &XrefEdge> {
        self.inner
            .edge_indices()
            .filter_map(move |idx| self.inner.edge_weight(idx))
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    pub fn to_json(&self) -> Result<String> {
        let snapshot = GraphSnapshot {
            edges: self.all_edges().cloned().collect(),
        };
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let snapshot: GraphSnapshot = serde_json::from_str(text)?;
        let mut graph = XrefGraph::new();
        for edge in snapshot.edges {
            graph.add_edge(edge);
        }
        Ok(graph)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load a saved graph; a missing file yields an empty graph.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(XrefGraph::new());
        }
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}
