use super::document::SceneGraph;
use std::collections::HashMap;

/// Primary label and score of every node, built once per document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelIndex {
    entries: HashMap<u32, NodeLabel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeLabel {
    pub class: String,
    pub confidence: Option<f64>,
}

impl LabelIndex {
    pub fn from_graph(graph: &SceneGraph) -> Self {
        let entries = graph
            .nodes
            .iter()
            .map(|n| {
                (
                    n.id,
                    NodeLabel {
                        class: n.primary_class().unwrap_or_default().to_string(),
                        confidence: n.primary_confidence(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, id: u32) -> Option<&NodeLabel> {
        self.entries.get(&id)
    }

    pub fn class(&self, id: u32) -> Option<&str> {
        self.get(id).map(|l| l.class.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vertex label used by graph rendering: `(id) class = confidence`.
    pub fn display(&self, id: u32) -> Option<String> {
        self.get(id).map(|l| match l.confidence {
            Some(c) => format!("({}) {} = {}", id, l.class, format_score(c)),
            None => format!("({}) {}", id, l.class),
        })
    }
}

/// Round to two decimals, always keeping at least one fractional digit.
pub fn format_score(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{:.1}", rounded)
    } else {
        format!("{}", rounded)
    }
}
