//! Extraction of STEP-contributed relations for ground-truth comparison.

use crate::schema::{LabelIndex, SceneGraph};
use indexmap::IndexMap;
use tracing::debug;

/// Map `"<source> <relation> <dest>"` to the relation's score for every
/// STEP-tagged edge.
///
/// Each edge contributes at most one triple, naming its first destination. A
/// later edge producing the same triple text overwrites the earlier score.
/// Edges whose destination is still unresolved cannot form a triple and are
/// left out.
pub fn isolate_step_triples(
    graph: &SceneGraph,
    labels: &LabelIndex,
) -> IndexMap<String, Option<f64>> {
    let mut triples = IndexMap::new();
    for edge in graph.step_edges() {
        let Some(&dest) = edge.dest.ids().first() else {
            debug!(source = edge.source, "step edge has no destination yet");
            continue;
        };
        if edge.dest.ids().len() > 1 {
            debug!(
                source = edge.source,
                dest,
                "step edge has several destinations, using the first"
            );
        }
        let (Some(source), Some(relation), Some(dest)) =
            (labels.class(edge.source), edge.primary_class(), labels.class(dest))
        else {
            continue;
        };
        triples.insert(
            format!("{} {} {}", source, relation, dest),
            edge.primary_confidence(),
        );
    }
    triples
}
