use crate::geometry::BoundingBox;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Provenance tag of the primary scene parser.
pub const EXPERT_CAUSAL_TDE: &str = "causal_tde";
/// Provenance tag of the STEP action detector.
pub const EXPERT_STEP: &str = "step";

/// A detected entity.
#[derive(Debug, Serialize, Deserialize, JsonSchema, Clone, PartialEq)]
pub struct Node {
    pub id: u32,
    pub bb: BoundingBox,
    /// External knowledge-graph references, carried through untouched.
    #[serde(default)]
    pub kg_mapping: Vec<serde_json::Value>,
    /// Labels, most relevant first.
    pub class: Vec<String>,
    /// Scores parallel to `class`.
    pub confidence: Vec<f64>,
    #[serde(default)]
    pub expert: Vec<String>,
}

impl Node {
    pub fn new(id: u32, bb: BoundingBox, label: impl Into<String>, confidence: f64) -> Self {
        Self {
            id,
            bb,
            kg_mapping: Vec::new(),
            class: vec![label.into()],
            confidence: vec![confidence],
            expert: Vec::new(),
        }
    }

    pub fn with_expert(mut self, expert: impl Into<String>) -> Self {
        self.expert.push(expert.into());
        self
    }

    pub fn primary_class(&self) -> Option<&str> {
        self.class.first().map(String::as_str)
    }

    pub fn primary_confidence(&self) -> Option<f64> {
        self.confidence.first().copied()
    }

    pub fn has_expert(&self, expert: &str) -> bool {
        self.expert.iter().any(|e| e == expert)
    }
}
