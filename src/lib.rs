pub mod builder;
pub mod captions;
pub mod config;
pub mod error;
pub mod export;
pub mod fusion;
pub mod geometry;
pub mod io;
pub mod provenance;
pub mod schema;

pub use error::{Result, SceneGraphError};
pub use fusion::{FusionConfig, FusionReport, StepAnnotation, fuse};
pub use geometry::{BoundingBox, intersection_over_union};
pub use schema::{Dest, Edge, LabelIndex, Node, SceneGraph};
