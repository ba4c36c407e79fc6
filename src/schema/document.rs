use super::edge::{Dest, Edge};
use super::node::Node;
use crate::error::{Result, SceneGraphError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Scene graph over one image frame.
#[derive(Debug, Serialize, Deserialize, JsonSchema, Clone, PartialEq, Default)]
pub struct SceneGraph {
    /// Image path the graph was extracted from.
    pub frame: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Reserved, carried through untouched.
    #[serde(default)]
    pub lighthouse: Vec<serde_json::Value>,
}

impl SceneGraph {
    pub fn new(frame: impl Into<String>) -> Self {
        Self {
            frame: frame.into(),
            ..Self::default()
        }
    }

    pub fn node(&self, id: u32) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges contributed by the STEP action detector.
    pub fn step_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| e.is_step())
    }

    /// Check the structural invariants of the document.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !ids.insert(node.id) {
                return Err(SceneGraphError::DuplicateNodeId(node.id));
            }
            if node.class.is_empty() {
                return Err(SceneGraphError::malformed(format!(
                    "node {} has no class label",
                    node.id
                )));
            }
            if node.class.len() != node.confidence.len() {
                return Err(SceneGraphError::malformed(format!(
                    "node {} has {} labels but {} confidences",
                    node.id,
                    node.class.len(),
                    node.confidence.len()
                )));
            }
            if let Some(c) = node.confidence.iter().find(|c| !(0.0..=1.0).contains(*c)) {
                return Err(SceneGraphError::malformed(format!(
                    "node {} has confidence {} outside [0, 1]",
                    node.id, c
                )));
            }
        }

        for (index, edge) in self.edges.iter().enumerate() {
            if !ids.contains(&edge.source) {
                return Err(SceneGraphError::UnresolvedReference {
                    edge: index,
                    id: edge.source,
                });
            }
            if matches!(&edge.dest, Dest::Many(d) if d.is_empty()) {
                return Err(SceneGraphError::malformed(format!(
                    "edge {} has an empty destination list; use Dest::Unresolved",
                    index
                )));
            }
            if let Some(&id) = edge.dest.ids().iter().find(|id| !ids.contains(*id)) {
                return Err(SceneGraphError::UnresolvedReference { edge: index, id });
            }
            if edge.class.is_empty() {
                return Err(SceneGraphError::malformed(format!(
                    "edge {} has no class label",
                    index
                )));
            }
            if !edge.confidence.is_empty() && edge.confidence.len() != edge.class.len() {
                return Err(SceneGraphError::malformed(format!(
                    "edge {} has {} labels but {} confidences",
                    index,
                    edge.class.len(),
                    edge.confidence.len()
                )));
            }
            if let Some(c) = edge.confidence.iter().find(|c| !(0.0..=1.0).contains(*c)) {
                return Err(SceneGraphError::malformed(format!(
                    "edge {} has confidence {} outside [0, 1]",
                    index, c
                )));
            }
        }

        Ok(())
    }

    /// Parse and validate a document.
    pub fn from_json_str(input: &str) -> Result<Self> {
        let graph: SceneGraph = serde_json::from_str(input)
            .map_err(|e| SceneGraphError::malformed(format!("scene graph: {}", e)))?;
        graph.validate()?;
        Ok(graph)
    }

    /// Serialize with four-space indentation in schema key order.
    pub fn to_json_string(&self) -> Result<String> {
        to_pretty_json(self)
    }
}

/// Four-space pretty printing shared by every JSON artifact the crate writes.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .map_err(|e| SceneGraphError::malformed(format!("serialization failed: {}", e)))?;
    String::from_utf8(buf).map_err(|e| SceneGraphError::malformed(e.to_string()))
}
