//! Scene graph construction from the primary scene parser's raw detections.
//!
//! The parser reports objects and relations with integer class indices; the
//! dataset label map turns them back into names. Objects and relations are
//! kept only above their score thresholds, and a relation survives only if
//! both of its endpoints did.

use crate::error::{Result, SceneGraphError};
use crate::geometry::BoundingBox;
use crate::io::{BASE_SUFFIX, read_json, save_graph};
use crate::schema::{Dest, EXPERT_CAUSAL_TDE, Edge, Node, SceneGraph};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection {
    pub rect: [f64; 4],
    pub class: usize,
    pub conf: f64,
    #[serde(default)]
    pub attr: Vec<usize>,
    #[serde(default)]
    pub attr_conf: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDetection {
    pub subj_id: usize,
    pub obj_id: usize,
    pub class: usize,
    pub conf: f64,
}

/// Raw per-image output of the scene parser.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectorOutput {
    pub objects: Vec<ObjectDetection>,
    #[serde(default)]
    pub relations: Vec<RelationDetection>,
}

/// Dataset label map file: name -> index tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetLabelMap {
    pub label_to_idx: HashMap<String, usize>,
    #[serde(default)]
    pub attribute_to_idx: HashMap<String, usize>,
    #[serde(default)]
    pub predicate_to_idx: HashMap<String, usize>,
}

/// Index -> name lookups derived once from a [`DatasetLabelMap`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelMap {
    objects: HashMap<usize, String>,
    attributes: HashMap<usize, String>,
    predicates: HashMap<usize, String>,
}

fn invert(table: &HashMap<String, usize>) -> HashMap<usize, String> {
    table.iter().map(|(name, &idx)| (idx, name.clone())).collect()
}

impl From<&DatasetLabelMap> for LabelMap {
    fn from(map: &DatasetLabelMap) -> Self {
        Self {
            objects: invert(&map.label_to_idx),
            attributes: invert(&map.attribute_to_idx),
            predicates: invert(&map.predicate_to_idx),
        }
    }
}

impl LabelMap {
    pub fn load(path: &Path) -> Result<Self> {
        let raw: DatasetLabelMap = read_json(path)?;
        Ok(Self::from(&raw))
    }

    fn lookup<'a>(
        table: &'a HashMap<usize, String>,
        kind: &'static str,
        index: usize,
    ) -> Result<&'a str> {
        table
            .get(&index)
            .map(|s| s.trim())
            .ok_or(SceneGraphError::UnknownLabel { kind, index })
    }

    pub fn object(&self, index: usize) -> Result<&str> {
        Self::lookup(&self.objects, "object", index)
    }

    pub fn attribute(&self, index: usize) -> Result<&str> {
        Self::lookup(&self.attributes, "attribute", index)
    }

    pub fn predicate(&self, index: usize) -> Result<&str> {
        Self::lookup(&self.predicates, "predicate", index)
    }
}

/// Read a visualization label list: one label per line, optionally followed
/// by a tab and an index.
pub fn load_visual_labels(path: &Path) -> Result<HashSet<String>> {
    let content = fs::read_to_string(path).map_err(|e| SceneGraphError::io(path, e))?;
    Ok(content
        .lines()
        .filter_map(|line| line.split('\t').next())
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

const COMMON_ATTRIBUTES: &[&str] = &[
    "white", "black", "blue", "green", "red", "brown", "yellow", "small", "large", "silver",
    "wooden", "wood", "orange", "gray", "grey", "metal", "pink", "tall", "long", "dark", "purple",
];
const COMMON_ATTRIBUTE_THRESHOLD: f64 = 0.1;
const ATTRIBUTE_ALIASES: &[(&str, &str)] = &[("blonde", "blond")];

/// Clean up attribute predictions.
///
/// Weak common attributes are dropped, aliases folded, and duplicate labels
/// summed. The result is ordered by ascending score, most confident last.
pub fn postprocess_attributes(
    labels: &LabelMap,
    attr: &[usize],
    attr_conf: &[f64],
) -> Result<Vec<(String, f64)>> {
    let mut merged: IndexMap<String, f64> = IndexMap::new();
    for (&index, &conf) in attr.iter().zip(attr_conf) {
        let label = labels.attribute(index)?;
        if COMMON_ATTRIBUTES.contains(&label) && conf < COMMON_ATTRIBUTE_THRESHOLD {
            continue;
        }
        let target = ATTRIBUTE_ALIASES
            .iter()
            .find(|(from, _)| *from == label)
            .map_or(label, |(_, to)| *to);
        *merged.entry(target.to_string()).or_insert(0.0) += conf;
    }
    let mut sorted: Vec<(String, f64)> = merged.into_iter().collect();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(sorted)
}

/// Reject score thresholds outside `[0, 1]`.
pub fn validate_threshold(name: &str, value: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&value) {
        return Err(SceneGraphError::malformed(format!(
            "{} {} not in range [0.0, 1.0]",
            name, value
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub min_obj_score: f64,
    pub min_rel_score: f64,
    pub postprocess_attributes: bool,
    /// Keep only objects whose class is listed.
    pub visual_labels: Option<HashSet<String>>,
}

/// Build the scene graph of one frame.
pub fn build_scene_graph(
    frame: &str,
    output: &DetectorOutput,
    labels: &LabelMap,
    options: &BuildOptions,
) -> Result<SceneGraph> {
    validate_threshold("min_obj_score", options.min_obj_score)?;
    validate_threshold("min_rel_score", options.min_rel_score)?;

    let mut graph = SceneGraph::new(frame);
    let mut accepted = HashSet::new();

    for (index, object) in output.objects.iter().enumerate() {
        let class = labels.object(object.class)?;
        if let Some(allowed) = &options.visual_labels
            && !allowed.contains(class)
        {
            continue;
        }
        if object.conf <= options.min_obj_score {
            continue;
        }

        let label = if options.postprocess_attributes {
            let attrs = postprocess_attributes(labels, &object.attr, &object.attr_conf)?;
            let names: Vec<&str> = attrs.iter().map(|(n, _)| n.as_str()).collect();
            format!("{} {}", names.join(","), class).trim().to_string()
        } else {
            class.to_string()
        };

        let id = u32::try_from(index)
            .map_err(|_| SceneGraphError::malformed(format!("object index {} too large", index)))?;
        let [xmin, ymin, xmax, ymax] = object.rect;
        let bb = BoundingBox::new(xmin, ymin, xmax, ymax)?;
        graph
            .nodes
            .push(Node::new(id, bb, label, object.conf).with_expert(EXPERT_CAUSAL_TDE));
        accepted.insert(index);
    }

    for rel in &output.relations {
        if rel.conf <= options.min_rel_score {
            continue;
        }
        if !(accepted.contains(&rel.subj_id) && accepted.contains(&rel.obj_id)) {
            continue;
        }
        let predicate = labels.predicate(rel.class)?;
        // both ids fit in u32: they were accepted above
        let edge = Edge::new(rel.subj_id as u32, Dest::Single(rel.obj_id as u32), predicate)
            .with_confidence(rel.conf)
            .with_expert(EXPERT_CAUSAL_TDE);
        graph.edges.push(edge);
    }

    graph.validate()?;
    Ok(graph)
}

/// Image ids of one or more `<split>_prepross.json` files, first-seen order.
pub fn collect_image_ids(files: &[PathBuf]) -> Result<Vec<String>> {
    let mut ids = IndexSet::new();
    for file in files {
        let records: Vec<crate::captions::IdsRecord> = read_json(file)?;
        ids.extend(records.into_iter().map(|r| r.idx));
    }
    Ok(ids.into_iter().collect())
}

/// Per-image file locations for a batch build.
#[derive(Debug, Clone)]
pub struct BatchLayout {
    pub detections_dir: PathBuf,
    pub out_dir: PathBuf,
}

impl BatchLayout {
    fn relative(id: &str, suffix: &str) -> PathBuf {
        let id = Path::new(id);
        let stem = id
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = format!("{}{}", stem, suffix);
        match id.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }

    pub fn detections_path(&self, id: &str) -> PathBuf {
        self.detections_dir.join(Self::relative(id, ".json"))
    }

    pub fn output_path(&self, id: &str) -> PathBuf {
        self.out_dir.join(Self::relative(id, BASE_SUFFIX))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub built: usize,
    pub existing: usize,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub id: String,
    pub error: String,
}

/// Build every listed frame, skipping outputs that already exist.
///
/// A failing frame is logged and recorded; the batch moves on.
pub fn build_batch(
    ids: &[String],
    layout: &BatchLayout,
    labels: &LabelMap,
    options: &BuildOptions,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    for (i, id) in ids.iter().enumerate() {
        if i % 100 == 0 {
            info!(
                "{} of {}... {:.2}%",
                i,
                ids.len(),
                i as f64 * 100.0 / ids.len() as f64
            );
        }

        let out = layout.output_path(id);
        if out.exists() {
            summary.existing += 1;
            continue;
        }

        let result = read_json::<DetectorOutput>(&layout.detections_path(id))
            .and_then(|raw| build_scene_graph(id, &raw, labels, options))
            .and_then(|graph| save_graph(&out, &graph));
        match result {
            Ok(()) => summary.built += 1,
            Err(e) => {
                error!(id = %id, "failed to build scene graph: {}", e);
                summary.failed.push(BatchFailure {
                    id: id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    summary
}
