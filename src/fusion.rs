//! Anchoring STEP action detections onto an existing scene graph.
//!
//! Every detection is matched against all nodes by IoU. The best-overlapping
//! node becomes the `source` of a new `step` edge; the edge's `dest` stays
//! [`Dest::Unresolved`] for a downstream pass to link. Detections with no
//! overlapping node, or whose best overlap is below `min_iou`, are reported
//! instead of being forced onto an arbitrary node.

use crate::error::{Result, SceneGraphError};
use crate::geometry::{
    BoundingBox, BoxScale, CenterBox, convert_box_format, intersection_over_union,
};
use crate::io::read_json;
use crate::schema::{Dest, EXPERT_STEP, Edge, SceneGraph};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Output of the STEP action detector for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAnnotation {
    pub detection_classes: Vec<String>,
    /// Center-based boxes, see [`CenterBox`].
    pub detection_boxes: Vec<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_scores: Option<Vec<f64>>,
}

impl StepAnnotation {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn len(&self) -> usize {
        self.detection_classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detection_classes.is_empty()
    }

    fn check_lengths(&self) -> Result<()> {
        if self.detection_classes.len() != self.detection_boxes.len() {
            return Err(SceneGraphError::malformed(format!(
                "annotation has {} classes but {} boxes",
                self.detection_classes.len(),
                self.detection_boxes.len()
            )));
        }
        if let Some(scores) = &self.detection_scores
            && scores.len() != self.detection_classes.len()
        {
            return Err(SceneGraphError::malformed(format!(
                "annotation has {} classes but {} scores",
                self.detection_classes.len(),
                scores.len()
            )));
        }
        if let Some(score) = self
            .detection_scores
            .iter()
            .flatten()
            .find(|s| !(0.0..=1.0).contains(*s))
        {
            return Err(SceneGraphError::malformed(format!(
                "annotation has detection score {} outside [0, 1]",
                score
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    /// Minimum IoU for a node to anchor a detection. Zero overlap never anchors.
    pub min_iou: f64,
    pub box_scale: BoxScale,
    /// Copy the detector's own score into the edge confidence.
    pub carry_scores: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_iou: 0.0,
            box_scale: BoxScale::Pixel,
            carry_scores: false,
        }
    }
}

/// A node scored against one detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnchorCandidate {
    pub node: u32,
    pub iou: f64,
}

impl AnchorCandidate {
    /// Higher IoU wins; equal IoU goes to the smaller node id.
    pub fn outranks(&self, other: &AnchorCandidate) -> bool {
        self.iou > other.iou || (self.iou == other.iou && self.node < other.node)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub detection: usize,
    pub label: String,
    pub node: u32,
    pub iou: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedDetection {
    pub detection: usize,
    pub label: String,
    /// Best candidate found, `None` when the graph has no nodes.
    pub best: Option<AnchorCandidate>,
}

impl SkippedDetection {
    pub fn to_error(&self) -> SceneGraphError {
        SceneGraphError::NoPlausibleAnchor {
            label: self.label.clone(),
            best_iou: self.best.map(|b| b.iou).unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionReport {
    pub graph: SceneGraph,
    pub attached: Vec<Attachment>,
    pub skipped: Vec<SkippedDetection>,
}

/// Best anchor for `region` among the graph's nodes.
pub fn best_anchor(graph: &SceneGraph, region: &BoundingBox) -> Result<Option<AnchorCandidate>> {
    let mut best: Option<AnchorCandidate> = None;
    for node in &graph.nodes {
        let candidate = AnchorCandidate {
            node: node.id,
            iou: intersection_over_union(region, &node.bb)?,
        };
        debug!(node = node.id, iou = candidate.iou, "scored anchor candidate");
        if best.is_none_or(|b| candidate.outranks(&b)) {
            best = Some(candidate);
        }
    }
    Ok(best)
}

/// Attach every STEP detection to its best-overlapping node.
///
/// Returns a new graph; `base` is left untouched. Existing nodes and edges are
/// preserved in order and new edges are appended after them.
pub fn fuse(
    base: &SceneGraph,
    annotation: &StepAnnotation,
    config: &FusionConfig,
) -> Result<FusionReport> {
    base.validate()?;
    annotation.check_lengths()?;

    let mut graph = base.clone();
    let mut attached = Vec::new();
    let mut skipped = Vec::new();

    for (index, (label, raw_box)) in annotation
        .detection_classes
        .iter()
        .zip(&annotation.detection_boxes)
        .enumerate()
    {
        let region = convert_box_format(CenterBox::from(*raw_box), config.box_scale)?;
        let best = best_anchor(base, &region)?;

        let anchor = match best {
            Some(b) if b.iou > 0.0 && b.iou >= config.min_iou => b,
            _ => {
                let skip = SkippedDetection {
                    detection: index,
                    label: label.clone(),
                    best,
                };
                warn!(frame = %base.frame, "{}", skip.to_error());
                skipped.push(skip);
                continue;
            }
        };

        let mut edge = Edge::new(anchor.node, Dest::Unresolved, label.clone())
            .with_region(region)
            .with_expert(EXPERT_STEP);
        if config.carry_scores
            && let Some(score) = annotation.detection_scores.as_ref().and_then(|s| s.get(index))
        {
            edge = edge.with_confidence(*score);
        }
        graph.edges.push(edge);

        debug!(
            detection = index,
            label = %label,
            node = anchor.node,
            iou = anchor.iou,
            "attached step edge"
        );
        attached.push(Attachment {
            detection: index,
            label: label.clone(),
            node: anchor.node,
            iou: anchor.iou,
        });
    }

    info!(
        frame = %base.frame,
        attached = attached.len(),
        skipped = skipped.len(),
        "fused step detections"
    );

    Ok(FusionReport {
        graph,
        attached,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EXPERT_CAUSAL_TDE, Node};

    fn bb(c: [f64; 4]) -> BoundingBox {
        BoundingBox::try_from(c).unwrap()
    }

    fn cup_and_table() -> SceneGraph {
        let mut g = SceneGraph::new("kitchen/0001.jpg");
        g.nodes.push(
            Node::new(0, bb([0.0, 0.0, 10.0, 10.0]), "cup", 0.9).with_expert(EXPERT_CAUSAL_TDE),
        );
        g.nodes.push(
            Node::new(1, bb([0.0, 0.0, 20.0, 20.0]), "table", 0.8).with_expert(EXPERT_CAUSAL_TDE),
        );
        g.edges.push(
            Edge::new(0, Dest::Single(1), "on")
                .with_confidence(0.7)
                .with_expert(EXPERT_CAUSAL_TDE),
        );
        g
    }

    fn annotation(items: &[(&str, [f64; 4])]) -> StepAnnotation {
        StepAnnotation {
            detection_classes: items.iter().map(|(l, _)| l.to_string()).collect(),
            detection_boxes: items.iter().map(|(_, b)| *b).collect(),
            detection_scores: None,
        }
    }

    fn fuse_default(graph: &SceneGraph, items: &[(&str, [f64; 4])]) -> FusionReport {
        fuse(graph, &annotation(items), &FusionConfig::default()).unwrap()
    }

    #[test]
    fn small_action_box_anchors_on_tightest_node() {
        // [2,2,8,8] scores IoU 0.36 against the cup and 0.09 against the table,
        // so the cup anchors it even though the box lies inside the table too.
        let report = fuse_default(&cup_and_table(), &[("on", [5.0, 5.0, 6.0, 6.0])]);
        let edge = report.graph.edges.last().unwrap();
        assert_eq!(edge.source, 0);
        assert_eq!(edge.bb.unwrap().to_array(), [2.0, 2.0, 8.0, 8.0]);
    }

    #[test]
    fn large_action_box_anchors_on_table() {
        // [2,2,18,18]: IoU ~0.22 with the cup, 0.64 with the table.
        let report = fuse_default(&cup_and_table(), &[("on", [10.0, 10.0, 16.0, 16.0])]);
        let edge = report.graph.edges.last().unwrap();
        assert_eq!(edge.source, 1);
        assert_eq!(edge.class, vec!["on".to_string()]);
        assert_eq!(edge.expert, vec!["step".to_string()]);
        assert!(edge.confidence.is_empty());
        assert_eq!(edge.dest, Dest::Unresolved);
        assert_eq!(report.attached.len(), 1);
        assert!((report.attached[0].iou - 0.64).abs() < 1e-12);
    }

    #[test]
    fn fusion_only_appends() {
        let base = cup_and_table();
        let ann = annotation(&[
            ("drink", [5.0, 5.0, 4.0, 4.0]),
            ("wipe", [10.0, 10.0, 16.0, 16.0]),
        ]);
        let report = fuse(&base, &ann, &FusionConfig::default()).unwrap();

        assert_eq!(report.graph.nodes, base.nodes);
        assert_eq!(&report.graph.edges[..base.edges.len()], &base.edges[..]);
        assert_eq!(report.graph.edges.len(), base.edges.len() + 2);
        assert_eq!(base.edges.len(), 1);
    }

    #[test]
    fn fusion_is_deterministic() {
        let base = cup_and_table();
        let ann = annotation(&[
            ("drink", [5.0, 5.0, 4.0, 4.0]),
            ("drink", [5.0, 5.0, 4.0, 4.0]),
        ]);
        let first = fuse(&base.clone(), &ann, &FusionConfig::default()).unwrap();
        let second = fuse(&base.clone(), &ann, &FusionConfig::default()).unwrap();
        assert_eq!(first, second);
        // duplicates are kept
        assert_eq!(first.graph.step_edges().count(), 2);
    }

    #[test]
    fn ties_go_to_the_smallest_id() {
        let mut g = SceneGraph::new("f.jpg");
        g.nodes.push(Node::new(7, bb([0.0, 0.0, 10.0, 10.0]), "a", 0.5));
        g.nodes.push(Node::new(3, bb([0.0, 0.0, 10.0, 10.0]), "b", 0.5));
        g.nodes.push(Node::new(5, bb([0.0, 0.0, 10.0, 10.0]), "c", 0.5));
        let report = fuse_default(&g, &[("sit", [5.0, 5.0, 10.0, 10.0])]);
        assert_eq!(report.graph.edges[0].source, 3);
    }

    #[test]
    fn outranks_is_strict() {
        let a = AnchorCandidate { node: 1, iou: 0.5 };
        let b = AnchorCandidate { node: 2, iou: 0.5 };
        assert!(a.outranks(&b));
        assert!(!b.outranks(&a));
        assert!(!a.outranks(&a));
        assert!(AnchorCandidate { node: 9, iou: 0.6 }.outranks(&a));
    }

    #[test]
    fn non_overlapping_detection_is_skipped() {
        let report = fuse_default(&cup_and_table(), &[("fly", [100.0, 100.0, 4.0, 4.0])]);
        assert_eq!(report.graph.edges.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        let skip = &report.skipped[0];
        assert_eq!(skip.best.map(|b| b.iou), Some(0.0));
        assert!(matches!(skip.to_error(), SceneGraphError::NoPlausibleAnchor { .. }));
    }

    #[test]
    fn min_iou_threshold_filters_weak_matches() {
        let config = FusionConfig {
            min_iou: 0.5,
            ..FusionConfig::default()
        };
        let ann = annotation(&[("on", [5.0, 5.0, 6.0, 6.0])]);
        let report = fuse(&cup_and_table(), &ann, &config).unwrap();
        assert!(report.attached.is_empty());
        assert_eq!(report.skipped[0].best, Some(AnchorCandidate { node: 0, iou: 0.36 }));
    }

    #[test]
    fn empty_graph_skips_everything() {
        let report = fuse_default(&SceneGraph::new("f.jpg"), &[("run", [1.0, 1.0, 1.0, 1.0])]);
        assert_eq!(report.skipped[0].best, None);
    }

    #[test]
    fn scores_are_carried_only_when_asked() {
        let mut ann = annotation(&[("wipe", [10.0, 10.0, 16.0, 16.0])]);
        ann.detection_scores = Some(vec![0.83]);

        let plain = fuse(&cup_and_table(), &ann, &FusionConfig::default()).unwrap();
        assert!(plain.graph.edges[1].confidence.is_empty());

        let config = FusionConfig {
            carry_scores: true,
            ..FusionConfig::default()
        };
        let scored = fuse(&cup_and_table(), &ann, &config).unwrap();
        assert_eq!(scored.graph.edges[1].confidence, vec![0.83]);
        assert!(scored.graph.validate().is_ok());
    }

    #[test]
    fn normalized_boxes_are_scaled_to_the_frame() {
        let config = FusionConfig {
            box_scale: BoxScale::Normalized {
                width: 20.0,
                height: 20.0,
            },
            ..FusionConfig::default()
        };
        let ann = annotation(&[("lean", [0.5, 0.5, 0.8, 0.8])]);
        let report = fuse(&cup_and_table(), &ann, &config).unwrap();
        assert_eq!(report.graph.edges[1].bb.unwrap().to_array(), [2.0, 2.0, 18.0, 18.0]);
        assert_eq!(report.graph.edges[1].source, 1);
    }

    #[test]
    fn mismatched_annotation_is_malformed() {
        let mut ann = annotation(&[("wipe", [10.0, 10.0, 16.0, 16.0])]);
        ann.detection_boxes.push([1.0, 1.0, 1.0, 1.0]);
        assert!(matches!(
            fuse(&cup_and_table(), &ann, &FusionConfig::default()),
            Err(SceneGraphError::MalformedInput(_))
        ));
    }

    #[test]
    fn out_of_range_detection_score_is_malformed() {
        let mut ann = annotation(&[("wipe", [10.0, 10.0, 16.0, 16.0])]);
        ann.detection_scores = Some(vec![5.0]);
        let config = FusionConfig {
            carry_scores: true,
            ..FusionConfig::default()
        };
        assert!(matches!(
            fuse(&cup_and_table(), &ann, &config),
            Err(SceneGraphError::MalformedInput(msg)) if msg.contains("outside [0, 1]")
        ));

        ann.detection_scores = Some(vec![-0.1]);
        assert!(fuse(&cup_and_table(), &ann, &FusionConfig::default()).is_err());
    }

    #[test]
    fn degenerate_detection_box_is_rejected() {
        let ann = annotation(&[("wipe", [10.0, 10.0, 0.0, 16.0])]);
        assert!(fuse(&cup_and_table(), &ann, &FusionConfig::default()).is_err());
    }

    #[test]
    fn annotation_json_shape() {
        let ann: StepAnnotation = serde_json::from_str(
            r#"{"detection_classes":["answer phone"],"detection_boxes":[[0.5,0.5,0.2,0.4]]}"#,
        )
        .unwrap();
        assert_eq!(ann.len(), 1);
        assert_eq!(ann.detection_scores, None);
    }
}
