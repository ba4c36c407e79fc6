pub mod document;
pub mod edge;
pub mod labels;
pub mod node;

pub use document::{SceneGraph, to_pretty_json};
pub use edge::{Dest, Edge};
pub use labels::{LabelIndex, NodeLabel, format_score};
pub use node::{EXPERT_CAUSAL_TDE, EXPERT_STEP, Node};
