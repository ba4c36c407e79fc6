//! Rendering views of a scene graph. Nothing here is persisted back into the
//! document.

pub mod dot;
pub mod graph;

pub use dot::{RenderFormat, render, render_pdf, to_dot, to_merged_dot};
pub use graph::{GraphProjection, edge_display_label};
