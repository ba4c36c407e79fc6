//! Bounding box formats and overlap scoring.
//!
//! Scene graph documents store boxes as pixel corners `(xmin, ymin, xmax, ymax)`.
//! The STEP action detector reports boxes as `(cx, cy, width, height)`, either
//! in pixels or normalized to the frame size, and [`convert_box_format`] brings
//! them into the document's convention.

use crate::error::{Result, SceneGraphError};
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in absolute pixel corner coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
}

impl BoundingBox {
    /// Build a box from corners, rejecting non-finite values and inverted corners.
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Result<Self> {
        let coords = [xmin, ymin, xmax, ymax];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(SceneGraphError::malformed(format!(
                "box {:?} has non-finite coordinates",
                coords
            )));
        }
        if xmin > xmax || ymin > ymax {
            return Err(SceneGraphError::malformed(format!(
                "box {:?} has inverted corners",
                coords
            )));
        }
        Ok(Self {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    pub fn xmin(&self) -> f64 {
        self.xmin
    }

    pub fn ymin(&self) -> f64 {
        self.ymin
    }

    pub fn xmax(&self) -> f64 {
        self.xmax
    }

    pub fn ymax(&self) -> f64 {
        self.ymax
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.xmin + self.xmax) / 2.0,
            (self.ymin + self.ymax) / 2.0,
        )
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }
}

impl TryFrom<[f64; 4]> for BoundingBox {
    type Error = SceneGraphError;

    fn try_from(c: [f64; 4]) -> Result<Self> {
        Self::new(c[0], c[1], c[2], c[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        b.to_array()
    }
}

impl JsonSchema for BoundingBox {
    fn schema_name() -> String {
        "BoundingBox".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        <[f64; 4]>::json_schema(generator)
    }
}

/// Center-based box as reported by the STEP detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterBox {
    pub cx: f64,
    pub cy: f64,
    pub width: f64,
    pub height: f64,
}

impl From<[f64; 4]> for CenterBox {
    fn from(v: [f64; 4]) -> Self {
        Self {
            cx: v[0],
            cy: v[1],
            width: v[2],
            height: v[3],
        }
    }
}

/// Coordinate convention of a [`CenterBox`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BoxScale {
    /// Values are already pixels.
    #[default]
    Pixel,
    /// Values are fractions of the frame size.
    Normalized { width: f64, height: f64 },
}

impl BoxScale {
    fn factors(&self) -> Result<(f64, f64)> {
        match *self {
            BoxScale::Pixel => Ok((1.0, 1.0)),
            BoxScale::Normalized { width, height } => {
                if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
                    return Err(SceneGraphError::malformed(format!(
                        "frame size {}x{} must be positive",
                        width, height
                    )));
                }
                Ok((width, height))
            }
        }
    }
}

/// Convert a center-based box into pixel corners.
pub fn convert_box_format(center: CenterBox, scale: BoxScale) -> Result<BoundingBox> {
    let CenterBox {
        cx,
        cy,
        width,
        height,
    } = center;
    if ![cx, cy, width, height].iter().all(|v| v.is_finite()) {
        return Err(SceneGraphError::malformed(format!(
            "center box {:?} has non-finite values",
            center
        )));
    }
    if width <= 0.0 || height <= 0.0 {
        return Err(SceneGraphError::malformed(format!(
            "center box {:?} has non-positive extent",
            center
        )));
    }

    let (sx, sy) = scale.factors()?;
    let (cx, cy) = (cx * sx, cy * sy);
    let (half_w, half_h) = (width * sx / 2.0, height * sy / 2.0);
    BoundingBox::new(cx - half_w, cy - half_h, cx + half_w, cy + half_h)
}

/// Intersection over union of two boxes.
///
/// Disjoint boxes (including boxes that only share an edge) score 0. A value
/// outside `[0, 1]` means one of the boxes is malformed and is reported as an
/// error instead of being clamped.
pub fn intersection_over_union(a: &BoundingBox, b: &BoundingBox) -> Result<f64> {
    let iw = (a.xmax.min(b.xmax) - a.xmin.max(b.xmin)).max(0.0);
    let ih = (a.ymax.min(b.ymax) - a.ymin.max(b.ymin)).max(0.0);
    let intersection = iw * ih;
    let union = a.area() + b.area() - intersection;

    if union <= 0.0 {
        return Ok(0.0);
    }

    let iou = intersection / union;
    if !(0.0..=1.0).contains(&iou) {
        return Err(SceneGraphError::malformed(format!(
            "IoU {} out of range for boxes {:?} and {:?}",
            iou,
            a.to_array(),
            b.to_array()
        )));
    }
    Ok(iou)
}
