//! Discovery of the dependency graph reachable from a set of roots.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use kiln_common::Guid;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, EdgeReference, NodeIndex};
use petgraph::visit::EdgeRef;
use tracing::{debug, warn};

use crate::asset::{DependencyKind, SourceAsset, SourceDatabase};
use crate::depends::{Dependency, EmbeddedAsset, PipelineDepends};
use crate::error::NodeFailure;
use crate::pipeline::PipelineRegistry;

/// A scanned asset: the source plus everything its scanner declared.
#[derive(Debug, Clone)]
pub struct AssetNode {
    /// The source asset.
    pub asset: SourceAsset,
    /// Declared dependencies in discovery order.
    pub dependencies: Vec<Dependency>,
    /// Embedded children in discovery order.
    pub embedded: Vec<EmbeddedAsset>,
    /// Declared external files in discovery order.
    pub files: Vec<PathBuf>,
}

impl AssetNode {
    /// The asset's GUID.
    pub fn guid(&self) -> Guid {
        self.asset.guid
    }

    /// Hard dependencies in discovery order.
    pub fn hard_dependencies(&self) -> impl Iterator<Item = Guid> + '_ {
        self.dependencies
            .iter()
            .filter(|d| d.kind == DependencyKind::Hard)
            .map(|d| d.guid)
    }
}

#[derive(Debug)]
struct GraphEntry {
    guid: Guid,
    node: Option<AssetNode>,
    failure: Option<NodeFailure>,
}

/// Every asset reachable from the build roots, with edges from dependents to
/// their dependencies.
///
/// Nodes that could not be scanned, and nodes on a cycle of hard edges, carry
/// a [`NodeFailure`] from the walk. Soft edges never form cycles.
pub struct DependencyGraph {
    graph: DiGraph<GraphEntry, DependencyKind>,
    index: HashMap<Guid, NodeIndex>,
    roots: Vec<Guid>,
    cycles: Vec<Vec<Guid>>,
    cycle_component: HashMap<NodeIndex, usize>,
}

impl DependencyGraph {
    /// Walks depth-first from `roots`, scanning every reachable asset once.
    pub fn walk(
        roots: &[Guid],
        sources: &dyn SourceDatabase,
        registry: &PipelineRegistry,
    ) -> Self {
        let mut graph = Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
            roots: Vec::new(),
            cycles: Vec::new(),
            cycle_component: HashMap::new(),
        };

        for &root in roots {
            if !graph.index.contains_key(&root) {
                graph.roots.push(root);
            }
            graph.ensure_node(root);
        }

        let mut pending: Vec<Guid> = graph.roots.iter().rev().copied().collect();
        let mut visited = HashSet::new();
        while let Some(guid) = pending.pop() {
            if !visited.insert(guid) {
                continue;
            }
            let idx = graph.ensure_node(guid);
            match scan(guid, sources, registry) {
                Ok(node) => {
                    for dep in &node.dependencies {
                        let dep_idx = graph.ensure_node(dep.guid);
                        graph.graph.add_edge(idx, dep_idx, dep.kind);
                    }
                    pending.extend(node.dependencies.iter().rev().map(|d| d.guid));
                    graph.graph[idx].node = Some(node);
                }
                Err(failure) => {
                    warn!(guid = %guid, reason = %failure, "asset could not be scanned");
                    graph.graph[idx].failure = Some(failure);
                }
            }
        }

        graph.detect_cycles();
        debug!(
            nodes = graph.graph.node_count(),
            edges = graph.graph.edge_count(),
            cycles = graph.cycles.len(),
            "dependency walk finished"
        );
        graph
    }

    fn ensure_node(&mut self, guid: Guid) -> NodeIndex {
        if let Some(&idx) = self.index.get(&guid) {
            return idx;
        }
        let idx = self.graph.add_node(GraphEntry {
            guid,
            node: None,
            failure: None,
        });
        self.index.insert(guid, idx);
        idx
    }

    fn hard_successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = self
            .graph
            .edges(idx)
            .filter(|e| *e.weight() == DependencyKind::Hard)
            .map(|e| e.target())
            .collect();
        next.sort();
        next
    }

    fn detect_cycles(&mut self) {
        let mut hard = DiGraph::<(), ()>::with_capacity(self.graph.node_count(), 0);
        for _ in self.graph.node_indices() {
            hard.add_node(());
        }
        for edge in self.graph.edge_references() {
            if *edge.weight() == DependencyKind::Hard {
                hard.add_edge(edge.source(), edge.target(), ());
            }
        }

        let mut components: Vec<Vec<NodeIndex>> = tarjan_scc(&hard)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|mut scc| {
                scc.sort();
                scc
            })
            .collect();
        components.sort();

        for (component, members) in components.into_iter().enumerate() {
            let set: HashSet<NodeIndex> = members.iter().copied().collect();
            let chain = self.cycle_chain(members[0], &set);
            warn!(
                members = members.len(),
                start = %self.graph[members[0]].guid,
                "hard dependency cycle"
            );
            for &member in &members {
                self.cycle_component.insert(member, component);
                self.graph[member].failure = Some(NodeFailure::DependencyCycle {
                    chain: chain.clone(),
                });
            }
            self.cycles.push(chain);
        }
    }

    /// Finds the shortest hard path from `start` back to itself within one
    /// strongly connected component.
    fn cycle_chain(&self, start: NodeIndex, members: &HashSet<NodeIndex>) -> Vec<Guid> {
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut seen = HashSet::from([start]);

        while let Some(current) = queue.pop_front() {
            for next in self.hard_successors(current) {
                if !members.contains(&next) {
                    continue;
                }
                if next == start {
                    let mut path = vec![current];
                    let mut cursor = current;
                    while let Some(&p) = parent.get(&cursor) {
                        path.push(p);
                        cursor = p;
                    }
                    path.reverse();
                    let mut chain: Vec<Guid> = path.iter().map(|&i| self.graph[i].guid).collect();
                    chain.push(self.graph[start].guid);
                    return chain;
                }
                if seen.insert(next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        let guid = self.graph[start].guid;
        vec![guid, guid]
    }

    fn is_ordering_edge(&self, edge: EdgeReference<'_, DependencyKind>) -> bool {
        if *edge.weight() != DependencyKind::Hard {
            return false;
        }
        match (
            self.cycle_component.get(&edge.source()),
            self.cycle_component.get(&edge.target()),
        ) {
            (Some(a), Some(b)) => a != b,
            _ => true,
        }
    }

    /// The roots the walk started from, without duplicates.
    pub fn roots(&self) -> &[Guid] {
        &self.roots
    }

    /// Number of discovered assets, including ones that failed to scan.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns `true` if nothing was discovered.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Every discovered GUID in discovery order.
    pub fn guids(&self) -> Vec<Guid> {
        self.graph.node_weights().map(|e| e.guid).collect()
    }

    /// Returns whether `guid` was discovered.
    pub fn contains(&self, guid: Guid) -> bool {
        self.index.contains_key(&guid)
    }

    /// The scanned node, if scanning succeeded.
    pub fn node(&self, guid: Guid) -> Option<&AssetNode> {
        self.index
            .get(&guid)
            .and_then(|&idx| self.graph[idx].node.as_ref())
    }

    /// The failure recorded during the walk, if any.
    pub fn failure(&self, guid: Guid) -> Option<&NodeFailure> {
        self.index
            .get(&guid)
            .and_then(|&idx| self.graph[idx].failure.as_ref())
    }

    /// Every hard cycle found, each as a GUID chain that starts and ends with
    /// the same asset.
    pub fn cycles(&self) -> &[Vec<Guid>] {
        &self.cycles
    }

    /// Hard dependencies that constrain the build order of `guid`: all hard
    /// edges except those inside a cycle.
    pub fn ordering_dependencies(&self, guid: Guid) -> Vec<Guid> {
        let Some(&idx) = self.index.get(&guid) else {
            return Vec::new();
        };
        let mut deps: Vec<(NodeIndex, Guid)> = self
            .graph
            .edges(idx)
            .filter(|e| self.is_ordering_edge(*e))
            .map(|e| (e.target(), self.graph[e.target()].guid))
            .collect();
        deps.sort_by_key(|(i, _)| *i);
        deps.into_iter().map(|(_, g)| g).collect()
    }

    /// A topological order of all nodes over hard edges, dependencies first.
    /// Edges inside cycles are ignored.
    pub fn build_order(&self) -> Vec<Guid> {
        let mut order_graph = DiGraph::<(), ()>::with_capacity(self.graph.node_count(), 0);
        for _ in self.graph.node_indices() {
            order_graph.add_node(());
        }
        for edge in self.graph.edge_references() {
            if self.is_ordering_edge(edge) {
                order_graph.add_edge(edge.target(), edge.source(), ());
            }
        }

        match toposort(&order_graph, None) {
            Ok(order) => order.into_iter().map(|i| self.graph[i].guid).collect(),
            Err(cycle) => {
                warn!(node = ?cycle.node_id(), "unexpected cycle in build order");
                self.guids()
            }
        }
    }

    /// Renders the graph in Graphviz DOT format. Soft edges are dashed and
    /// failed nodes are red.
    pub fn to_dot(&self) -> String {
        type G<'a> = &'a DiGraph<GraphEntry, DependencyKind>;

        let edge_attrs = |_: G<'_>, edge: EdgeReference<'_, DependencyKind>| -> String {
            match edge.weight() {
                DependencyKind::Hard => String::new(),
                DependencyKind::Soft => "style = dashed".to_string(),
            }
        };
        let node_attrs = |_: G<'_>, (_, entry): (NodeIndex, &GraphEntry)| -> String {
            let asset_type = entry
                .node
                .as_ref()
                .map(|n| n.asset.asset_type.as_str())
                .unwrap_or("?");
            let label = format!("{}\\n{}", entry.guid, asset_type.replace('"', "\\\""));
            if entry.failure.is_some() {
                format!("label = \"{label}\" color = red")
            } else {
                format!("label = \"{label}\"")
            }
        };

        let dot = Dot::with_attr_getters(
            &self.graph,
            &[Config::EdgeNoLabel, Config::NodeNoLabel],
            &edge_attrs,
            &node_attrs,
        );
        format!("{dot:?}")
    }
}

fn scan(
    guid: Guid,
    sources: &dyn SourceDatabase,
    registry: &PipelineRegistry,
) -> Result<AssetNode, NodeFailure> {
    let asset = sources.source(guid).ok_or(NodeFailure::MissingSource)?;
    let pipeline = registry
        .get(&asset.asset_type)
        .ok_or_else(|| NodeFailure::NoPipeline {
            asset_type: asset.asset_type.clone(),
        })?;

    let mut depends = PipelineDepends::new(registry, guid);
    pipeline
        .scan(&mut depends, &asset)
        .map_err(|e| NodeFailure::BuilderFailure {
            message: format!("dependency scan failed: {e}"),
        })?;

    let (dependencies, embedded, files) = depends.into_parts();
    Ok(AssetNode {
        asset,
        dependencies,
        embedded,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::MemorySourceDatabase;
    use crate::context::BuildContext;
    use crate::error::PipelineError;
    use crate::pipeline::{AssetBuilder, DependencyScanner};
    use std::io::Write;
    use std::sync::Arc;

    /// Payload lines: `h <n>` hard dependency, `s <n>` soft dependency,
    /// `fail` scanner error.
    struct Lines;

    impl DependencyScanner for Lines {
        fn scan(
            &self,
            depends: &mut PipelineDepends<'_>,
            asset: &SourceAsset,
        ) -> Result<(), PipelineError> {
            let text = String::from_utf8_lossy(&asset.payload);
            for line in text.lines() {
                let mut parts = line.split_whitespace();
                match (parts.next(), parts.next()) {
                    (Some("h"), Some(n)) => depends.add_dependency(guid(n), DependencyKind::Hard),
                    (Some("s"), Some(n)) => depends.add_dependency(guid(n), DependencyKind::Soft),
                    (Some("fail"), _) => return Err(PipelineError::invalid("scanner refused")),
                    _ => {}
                }
            }
            Ok(())
        }
    }

    impl AssetBuilder for Lines {
        fn version(&self) -> u32 {
            1
        }

        fn build(
            &self,
            _ctx: &BuildContext<'_>,
            _asset: &SourceAsset,
            _output: &mut dyn Write,
        ) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    fn guid(n: &str) -> Guid {
        Guid::from_u128(n.parse().unwrap())
    }

    fn g(n: u128) -> Guid {
        Guid::from_u128(n)
    }

    fn setup(assets: &[(u128, &str)]) -> (MemorySourceDatabase, PipelineRegistry) {
        let sources = MemorySourceDatabase::new();
        for &(n, payload) in assets {
            sources.insert(SourceAsset::new(g(n), "lines", payload.as_bytes().to_vec()));
        }
        let mut registry = PipelineRegistry::new();
        registry.register("lines", Arc::new(Lines));
        (sources, registry)
    }

    #[test]
    fn walks_transitive_dependencies() {
        let (sources, registry) = setup(&[(1, "h 2\ns 3"), (2, "h 4"), (3, ""), (4, "")]);
        let graph = DependencyGraph::walk(&[g(1)], &sources, &registry);
        assert_eq!(graph.len(), 4);
        assert!(graph.cycles().is_empty());
        assert_eq!(graph.ordering_dependencies(g(1)), vec![g(2)]);
        assert_eq!(graph.ordering_dependencies(g(2)), vec![g(4)]);
        assert_eq!(graph.node(g(1)).unwrap().dependencies.len(), 2);
    }

    #[test]
    fn build_order_puts_dependencies_first() {
        let (sources, registry) = setup(&[(1, "h 2\nh 3"), (2, "h 3"), (3, "")]);
        let graph = DependencyGraph::walk(&[g(1)], &sources, &registry);
        let order = graph.build_order();
        let pos = |n: u128| order.iter().position(|&x| x == g(n)).unwrap();
        assert!(pos(3) < pos(2));
        assert!(pos(2) < pos(1));
    }

    #[test]
    fn hard_cycle_reports_chain() {
        let (sources, registry) = setup(&[(1, "h 2"), (2, "h 1")]);
        let graph = DependencyGraph::walk(&[g(1)], &sources, &registry);
        assert_eq!(graph.cycles(), &[vec![g(1), g(2), g(1)]]);
        let expected = NodeFailure::DependencyCycle {
            chain: vec![g(1), g(2), g(1)],
        };
        assert_eq!(graph.failure(g(1)), Some(&expected));
        assert_eq!(graph.failure(g(2)), Some(&expected));
        assert_eq!(graph.build_order().len(), 2);
    }

    #[test]
    fn cycle_reached_through_soft_edge_is_still_found() {
        // 1 -soft-> 2 first, then 1 -hard-> 2 -hard-> 1.
        let (sources, registry) = setup(&[(1, "s 2\nh 2"), (2, "h 1")]);
        let graph = DependencyGraph::walk(&[g(1)], &sources, &registry);
        // The soft declaration is upgraded to hard by the scanner contract.
        assert_eq!(graph.cycles().len(), 1);
    }

    #[test]
    fn soft_cycle_is_allowed() {
        let (sources, registry) = setup(&[(1, "s 2"), (2, "s 1")]);
        let graph = DependencyGraph::walk(&[g(1)], &sources, &registry);
        assert!(graph.cycles().is_empty());
        assert!(graph.failure(g(1)).is_none());
        assert!(graph.failure(g(2)).is_none());
    }

    #[test]
    fn mixed_cycle_with_soft_edge_is_allowed() {
        let (sources, registry) = setup(&[(1, "s 2"), (2, "h 1")]);
        let graph = DependencyGraph::walk(&[g(1)], &sources, &registry);
        assert!(graph.cycles().is_empty());
        let order = graph.build_order();
        assert_eq!(order, vec![g(1), g(2)]);
    }

    #[test]
    fn nodes_outside_the_cycle_are_not_marked() {
        let (sources, registry) = setup(&[(1, "h 2"), (2, "h 3"), (3, "h 2\nh 4"), (4, "")]);
        let graph = DependencyGraph::walk(&[g(1)], &sources, &registry);
        assert_eq!(graph.cycles(), &[vec![g(2), g(3), g(2)]]);
        assert!(graph.failure(g(1)).is_none());
        assert!(graph.failure(g(4)).is_none());
        assert_eq!(graph.ordering_dependencies(g(3)), vec![g(4)]);
    }

    #[test]
    fn missing_source_and_scan_failures() {
        let sources = MemorySourceDatabase::new();
        sources.insert(SourceAsset::new(g(1), "lines", b"h 2\nh 3\nh 4".to_vec()));
        sources.insert(SourceAsset::new(g(3), "unknown", Vec::new()));
        sources.insert(SourceAsset::new(g(4), "lines", b"fail".to_vec()));
        let mut registry = PipelineRegistry::new();
        registry.register("lines", Arc::new(Lines));

        let graph = DependencyGraph::walk(&[g(1)], &sources, &registry);
        assert!(graph.failure(g(1)).is_none());
        assert_eq!(graph.failure(g(2)), Some(&NodeFailure::MissingSource));
        assert_eq!(
            graph.failure(g(3)),
            Some(&NodeFailure::NoPipeline {
                asset_type: "unknown".to_string()
            })
        );
        assert!(matches!(
            graph.failure(g(4)),
            Some(NodeFailure::BuilderFailure { .. })
        ));
    }

    #[test]
    fn duplicate_roots_are_collapsed() {
        let (sources, registry) = setup(&[(1, ""), (2, "")]);
        let graph = DependencyGraph::walk(&[g(1), g(2), g(1)], &sources, &registry);
        assert_eq!(graph.roots(), &[g(1), g(2)]);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn dot_output() {
        let (sources, registry) = setup(&[(1, "h 2\ns 3"), (2, ""), (3, "")]);
        let graph = DependencyGraph::walk(&[g(1)], &sources, &registry);
        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains(&g(1).to_string()));
        assert!(dot.contains("style = dashed"));
        assert!(dot.contains("lines"));
    }
}
