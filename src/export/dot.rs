use super::graph::GraphProjection;
use crate::error::{Result, SceneGraphError};
use petgraph::dot::{Config, Dot};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderFormat {
    Dot,
    #[default]
    Pdf,
    Svg,
}

impl RenderFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            RenderFormat::Dot => "dot",
            RenderFormat::Pdf => "pdf",
            RenderFormat::Svg => "svg",
        }
    }
}

impl FromStr for RenderFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dot" => Ok(RenderFormat::Dot),
            "pdf" => Ok(RenderFormat::Pdf),
            "svg" => Ok(RenderFormat::Svg),
            other => Err(format!(
                "unknown render format: {} (expected dot, pdf or svg)",
                other
            )),
        }
    }
}

fn quote(label: &str) -> String {
    let escaped = label
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{}\"", escaped)
}

/// DOT text of the projection with node and edge display labels.
pub fn to_dot(projection: &GraphProjection) -> String {
    labelled_dot(projection.graph())
}

/// Like [`to_dot`], with parallel edges collapsed into one labelled edge.
pub fn to_merged_dot(projection: &GraphProjection) -> String {
    labelled_dot(&projection.merged_graph())
}

fn labelled_dot(graph: &StableGraph<String, String>) -> String {
    let dot = Dot::with_attr_getters(
        graph,
        &[Config::NodeNoLabel, Config::EdgeNoLabel],
        &|_, edge| format!("label = {}", quote(edge.weight())),
        &|_, (_, label)| format!("label = {}", quote(label)),
    );
    dot.to_string()
}

/// Lay out and render DOT text with Graphviz.
pub fn render(dot: &str, output: &Path, format: RenderFormat, program: &str) -> Result<()> {
    if format == RenderFormat::Dot {
        return std::fs::write(output, dot).map_err(|e| SceneGraphError::io(output, e));
    }

    let mut child = Command::new(program)
        .arg(format!("-T{}", format.extension()))
        .arg("-o")
        .arg(output)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SceneGraphError::Render(format!("cannot run `{}`: {}", program, e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(dot.as_bytes())
            .map_err(|e| SceneGraphError::Render(format!("cannot feed `{}`: {}", program, e)))?;
    }

    let out = child
        .wait_with_output()
        .map_err(|e| SceneGraphError::Render(format!("`{}` did not finish: {}", program, e)))?;
    if !out.status.success() {
        return Err(SceneGraphError::Render(format!(
            "`{}` exited with {}: {}",
            program,
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    info!(path = %output.display(), "rendered graph");
    Ok(())
}

/// Render a PDF with the `dot` binary found on `PATH`.
pub fn render_pdf(dot: &str, output: &Path) -> Result<()> {
    render(dot, output, RenderFormat::Pdf, "dot")
}
