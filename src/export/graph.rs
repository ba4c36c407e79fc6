use crate::error::Result;
use crate::schema::{Edge, LabelIndex, SceneGraph, format_score};
use indexmap::IndexMap;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use std::collections::HashMap;
use tracing::debug;

/// Display label of a relation: `class\nconf`, emphasized for STEP edges.
pub fn edge_display_label(edge: &Edge) -> String {
    let class = edge.primary_class().unwrap_or_default();
    let head = if edge.is_step() {
        format!("** {} **", class)
    } else {
        class.to_string()
    };
    match edge.primary_confidence() {
        Some(c) => format!("{}\n{}", head, format_score(c)),
        None => head,
    }
}

/// Transient multigraph view of a scene graph, keyed by display labels.
///
/// Every node becomes a vertex, connected or not. Each relation contributes
/// one petgraph edge per resolved destination. A relation whose destination
/// is unresolved is drawn as a self-loop on its source node, so STEP edges
/// that are anchored but not yet linked still show up.
#[derive(Debug, Clone)]
pub struct GraphProjection {
    graph: StableGraph<String, String>,
    vertices: HashMap<u32, NodeIndex>,
    merged: IndexMap<(NodeIndex, NodeIndex), String>,
}

impl GraphProjection {
    pub fn from_graph(document: &SceneGraph) -> Result<Self> {
        document.validate()?;
        let labels = LabelIndex::from_graph(document);
        Ok(Self::with_labels(document, &labels))
    }

    /// Build from a validated document and its label index.
    pub fn with_labels(document: &SceneGraph, labels: &LabelIndex) -> Self {
        let mut graph = StableGraph::new();
        let mut vertices = HashMap::with_capacity(document.nodes.len());
        for node in &document.nodes {
            let label = labels.display(node.id).unwrap_or_else(|| format!("({})", node.id));
            vertices.insert(node.id, graph.add_node(label));
        }

        let mut merged: IndexMap<(NodeIndex, NodeIndex), String> = IndexMap::new();
        for edge in &document.edges {
            let Some(&source) = vertices.get(&edge.source) else {
                continue;
            };
            let targets: Vec<NodeIndex> = if edge.dest.is_resolved() {
                edge.dest
                    .ids()
                    .iter()
                    .filter_map(|id| vertices.get(id).copied())
                    .collect()
            } else {
                debug!(
                    source = edge.source,
                    class = ?edge.primary_class(),
                    "drawing unresolved edge on its source"
                );
                vec![source]
            };

            let label = edge_display_label(edge);
            for dest in targets {
                graph.add_edge(source, dest, label.clone());
                merged
                    .entry((source, dest))
                    .and_modify(|existing| {
                        existing.push_str(" / ");
                        existing.push_str(&label);
                    })
                    .or_insert_with(|| label.clone());
            }
        }

        Self {
            graph,
            vertices,
            merged,
        }
    }

    pub fn graph(&self) -> &StableGraph<String, String> {
        &self.graph
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn vertex_label(&self, id: u32) -> Option<&str> {
        self.vertices.get(&id).map(|&ix| self.graph[ix].as_str())
    }

    /// Ids of nodes with no drawn incident edge, ascending.
    pub fn isolated(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .vertices
            .iter()
            .filter(|&(_, &ix)| self.graph.neighbors_undirected(ix).next().is_none())
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// `(source label, dest label, label)` per vertex pair, parallel edges
    /// joined by ` / ` in insertion order.
    pub fn merged_edge_labels(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.merged.iter().map(|(&(source, dest), label)| {
            (
                self.graph[source].as_str(),
                self.graph[dest].as_str(),
                label.as_str(),
            )
        })
    }

    /// The same vertices with at most one edge per vertex pair.
    pub fn merged_graph(&self) -> StableGraph<String, String> {
        let mut graph = self.graph.clone();
        graph.clear_edges();
        for (&(source, dest), label) in &self.merged {
            graph.add_edge(source, dest, label.clone());
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;
    use crate::schema::{Dest, EXPERT_CAUSAL_TDE, EXPERT_STEP, Node};

    fn causal(source: u32, dest: u32, label: &str, score: f64) -> Edge {
        Edge::new(source, Dest::Single(dest), label)
            .with_confidence(score)
            .with_expert(EXPERT_CAUSAL_TDE)
    }

    fn document() -> SceneGraph {
        let bb = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let mut g = SceneGraph::new("f.jpg");
        g.nodes.push(Node::new(0, bb, "man", 0.934));
        g.nodes.push(Node::new(1, bb, "horse", 0.8));
        g.nodes.push(Node::new(2, bb, "hat", 0.5));
        g.edges.push(causal(0, 1, "riding", 0.61));
        g.edges.push(causal(0, 1, "on", 0.2));
        g.edges.push(Edge::new(0, Dest::Unresolved, "ride").with_expert(EXPERT_STEP));
        g
    }

    #[test]
    fn step_edges_are_emphasized() {
        let e = Edge::new(0, Dest::Single(1), "hold")
            .with_confidence(0.456)
            .with_expert(EXPERT_STEP);
        assert_eq!(edge_display_label(&e), "** hold **\n0.46");
        let plain = Edge::new(0, Dest::Single(1), "hold").with_confidence(1.0);
        assert_eq!(edge_display_label(&plain), "hold\n1.0");
        let unscored = Edge::new(0, Dest::Unresolved, "hold").with_expert(EXPERT_STEP);
        assert_eq!(edge_display_label(&unscored), "** hold **");
    }

    #[test]
    fn every_node_is_a_vertex() {
        let p = GraphProjection::from_graph(&document()).unwrap();
        assert_eq!(p.vertex_count(), 3);
        assert_eq!(p.edge_count(), 3);
        assert_eq!(p.isolated(), vec![2]);
        assert_eq!(p.vertex_label(2), Some("(2) hat = 0.5"));
    }

    #[test]
    fn unresolved_edges_loop_on_their_source() {
        let p = GraphProjection::from_graph(&document()).unwrap();
        let graph = p.graph();
        let loops: Vec<&str> = graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = graph.edge_endpoints(e)?;
                (a == b).then(|| graph[e].as_str())
            })
            .collect();
        assert_eq!(loops, vec!["** ride **"]);
    }

    #[test]
    fn lone_step_anchor_is_not_isolated() {
        let bb = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let mut g = SceneGraph::new("f.jpg");
        g.nodes.push(Node::new(4, bb, "door", 0.7));
        g.edges.push(Edge::new(4, Dest::Unresolved, "open").with_expert(EXPERT_STEP));
        let p = GraphProjection::from_graph(&g).unwrap();
        assert_eq!(p.vertex_count(), 1);
        assert_eq!(p.edge_count(), 1);
        assert!(p.isolated().is_empty());
    }

    #[test]
    fn parallel_edges_are_merged_for_display() {
        let p = GraphProjection::from_graph(&document()).unwrap();
        let merged: Vec<(&str, &str, &str)> = p.merged_edge_labels().collect();
        assert_eq!(
            merged,
            vec![
                ("(0) man = 0.93", "(1) horse = 0.8", "riding\n0.61 / on\n0.2"),
                ("(0) man = 0.93", "(0) man = 0.93", "** ride **"),
            ]
        );
    }

    #[test]
    fn merged_graph_keeps_one_edge_per_pair() {
        let p = GraphProjection::from_graph(&document()).unwrap();
        let merged = p.merged_graph();
        assert_eq!(merged.node_count(), p.vertex_count());
        assert_eq!(merged.edge_count(), 2);
        let labels: Vec<&str> = merged.edge_indices().map(|e| merged[e].as_str()).collect();
        assert_eq!(labels, vec!["riding\n0.61 / on\n0.2", "** ride **"]);
        // the multigraph itself is untouched
        assert_eq!(p.edge_count(), 3);
    }

    #[test]
    fn multi_destination_edges_fan_out() {
        let mut g = document();
        g.edges.push(Edge::new(2, Dest::Many(vec![0, 1]), "near").with_confidence(0.3));
        let p = GraphProjection::from_graph(&g).unwrap();
        assert_eq!(p.edge_count(), 5);
        assert!(p.isolated().is_empty());
    }

    #[test]
    fn invalid_document_is_rejected() {
        let mut g = document();
        g.edges[0].dest = Dest::Single(42);
        assert!(GraphProjection::from_graph(&g).is_err());
    }
}
