use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SceneGraphError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("edge {edge} references unknown node id {id}")]
    UnresolvedReference { edge: usize, id: u32 },
    #[error("duplicate node id {0}")]
    DuplicateNodeId(u32),
    #[error("no plausible anchor for detection '{label}' (best IoU {best_iou:.3})")]
    NoPlausibleAnchor { label: String, best_iou: f64 },
    #[error("unknown {kind} label index {index}")]
    UnknownLabel { kind: &'static str, index: usize },
    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("render failed: {0}")]
    Render(String),
}

impl SceneGraphError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = SceneGraphError> = std::result::Result<T, E>;
