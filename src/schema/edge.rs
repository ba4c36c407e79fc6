use super::node::EXPERT_STEP;
use crate::geometry::BoundingBox;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Target of a relation.
///
/// Serialized as a bare id, a list of ids, or `[]` while unresolved. STEP
/// edges are appended unresolved: the anchor node is known, the acted-upon
/// object is left for a later pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Dest {
    #[default]
    Unresolved,
    Single(u32),
    Many(Vec<u32>),
}

impl Dest {
    /// Resolved target ids, empty while unresolved.
    pub fn ids(&self) -> &[u32] {
        match self {
            Dest::Unresolved => &[],
            Dest::Single(id) => std::slice::from_ref(id),
            Dest::Many(ids) => ids,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.ids().is_empty()
    }
}

#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
enum DestRepr {
    One(u32),
    List(Vec<u32>),
}

impl Serialize for Dest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Dest::Unresolved => DestRepr::List(Vec::new()).serialize(serializer),
            Dest::Single(id) => DestRepr::One(*id).serialize(serializer),
            Dest::Many(ids) => ids.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Dest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match DestRepr::deserialize(deserializer)? {
            DestRepr::One(id) => Dest::Single(id),
            DestRepr::List(ids) if ids.is_empty() => Dest::Unresolved,
            DestRepr::List(ids) => Dest::Many(ids),
        })
    }
}

impl JsonSchema for Dest {
    fn schema_name() -> String {
        "Dest".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        DestRepr::json_schema(generator)
    }
}

/// A relation between nodes.
///
/// Every key is required on input; an unresolved destination or an ungrounded
/// region is written explicitly as `[]`.
#[derive(Debug, Serialize, Deserialize, JsonSchema, Clone, PartialEq)]
pub struct Edge {
    pub source: u32,
    pub dest: Dest,
    /// Relation region, `[]` when the relation is not spatially grounded.
    #[serde(with = "region")]
    #[schemars(with = "Vec<f64>")]
    pub bb: Option<BoundingBox>,
    pub class: Vec<String>,
    /// Scores parallel to `class`, or empty when the source gave none.
    pub confidence: Vec<f64>,
    pub expert: Vec<String>,
}

impl Edge {
    pub fn new(source: u32, dest: Dest, label: impl Into<String>) -> Self {
        Self {
            source,
            dest,
            bb: None,
            class: vec![label.into()],
            confidence: Vec::new(),
            expert: Vec::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence.push(confidence);
        self
    }

    pub fn with_region(mut self, bb: BoundingBox) -> Self {
        self.bb = Some(bb);
        self
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

    /// Whether the STEP action detector contributed this edge.
    pub fn is_step(&self) -> bool {
        self.has_expert(EXPERT_STEP)
    }
}

mod region {
    use crate::geometry::BoundingBox;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bb: &Option<BoundingBox>, s: S) -> Result<S::Ok, S::Error> {
        match bb {
            Some(b) => b.serialize(s),
            None => Vec::<f64>::new().serialize(s),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<BoundingBox>, D::Error> {
        let coords = Vec::<f64>::deserialize(d)?;
        match coords.as_slice() {
            [] => Ok(None),
            [xmin, ymin, xmax, ymax] => BoundingBox::new(*xmin, *ymin, *xmax, *ymax)
                .map(Some)
                .map_err(D::Error::custom),
            other => Err(D::Error::custom(format!(
                "edge box must be empty or have 4 coordinates, got {}",
                other.len()
            ))),
        }
    }
}
