//! Whole-document file access and the pipeline's file naming conventions.

use crate::error::{Result, SceneGraphError};
use crate::schema::{SceneGraph, to_pretty_json};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

pub const BASE_SUFFIX: &str = ".causal_tde.json";
pub const FUSED_SUFFIX: &str = "_step-fusion_gt.json";
pub const GRAPH_SUFFIX: &str = "_graph";

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| SceneGraphError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| SceneGraphError::json(path, e))
}

/// Write `value` as indented JSON, creating parent directories as needed.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| SceneGraphError::io(parent, e))?;
    }
    let mut content = to_pretty_json(value)?;
    content.push('\n');
    fs::write(path, content).map_err(|e| SceneGraphError::io(path, e))
}

/// Load and validate a scene graph document.
pub fn load_graph(path: &Path) -> Result<SceneGraph> {
    let graph: SceneGraph = read_json(path)?;
    graph.validate()?;
    Ok(graph)
}

pub fn save_graph(path: &Path, graph: &SceneGraph) -> Result<()> {
    write_json(path, graph)
}

/// File name up to its first `.`; `clip.causal_tde.json` -> `clip`.
fn leading_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.split_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => name,
    }
}

fn sibling(path: &Path, name: String) -> PathBuf {
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// `frames/0001.jpg` -> `0001.causal_tde.json`
pub fn base_document_name(frame: &Path) -> String {
    let stem = frame
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}{}", stem, BASE_SUFFIX)
}

/// `sg/0001.causal_tde.json` -> `sg/0001_step-fusion_gt.json`
pub fn fused_output_path(base: &Path) -> PathBuf {
    sibling(base, format!("{}{}", leading_stem(base), FUSED_SUFFIX))
}

/// `sg/0001.causal_tde.json` -> `sg/0001_graph.<ext>`
pub fn graph_output_path(document: &Path, extension: &str) -> PathBuf {
    sibling(
        document,
        format!("{}{}.{}", leading_stem(document), GRAPH_SUFFIX, extension),
    )
}
