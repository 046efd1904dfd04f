//! Geometry and page-content types shared by every pipeline stage.

use crate::labels::LayoutClass;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel space.
///
/// Serialised as `[x_min, y_min, x_max, y_max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x_min, b.y_min, b.x_max, b.y_max]
    }
}

impl BBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    /// Area, or 0 for inverted boxes.
    #[inline]
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Finite coordinates and strictly positive extent on both axes.
    pub fn is_valid(&self) -> bool {
        [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|v| v.is_finite())
            && self.x_max > self.x_min
            && self.y_max > self.y_min
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    /// Intersection over union; 0 when the union is empty.
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x_min.max(other.x_min);
        let y1 = self.y_min.max(other.y_min);
        let x2 = self.x_max.min(other.x_max);
        let y2 = self.y_max.min(other.y_max);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Whether `(x, y)` lies inside the box grown by `margin` on every side.
    /// Edges are inclusive.
    pub fn contains_with_margin(&self, x: f32, y: f32, margin: f32) -> bool {
        x >= self.x_min - margin
            && x <= self.x_max + margin
            && y >= self.y_min - margin
            && y <= self.y_max + margin
    }

    /// Clamp to `[0, width] × [0, height]`.
    pub fn clip(&self, width: f32, height: f32) -> BBox {
        BBox::new(
            self.x_min.clamp(0.0, width),
            self.y_min.clamp(0.0, height),
            self.x_max.clamp(0.0, width),
            self.y_max.clamp(0.0, height),
        )
    }
}

/// A detected page region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "LayoutItemRecord", into = "LayoutItemRecord")]
pub struct LayoutItem {
    pub bbox: BBox,
    /// Label exactly as the detector produced it.
    pub class_name: String,
    /// Class resolved from `class_name` at construction.
    pub class: LayoutClass,
    pub score: f32,
}

impl LayoutItem {
    pub fn new(bbox: BBox, class_name: impl Into<String>, score: f32) -> Self {
        let class_name = class_name.into();
        let class = LayoutClass::from_label(&class_name);
        Self {
            bbox,
            class_name,
            class,
            score,
        }
    }
}

/// Wire shape of a [`LayoutItem`]: `{bbox, class_name, score}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LayoutItemRecord {
    bbox: BBox,
    class_name: String,
    #[serde(default)]
    score: f32,
}

impl From<LayoutItemRecord> for LayoutItem {
    fn from(r: LayoutItemRecord) -> Self {
        LayoutItem::new(r.bbox, r.class_name, r.score)
    }
}

impl From<LayoutItem> for LayoutItemRecord {
    fn from(item: LayoutItem) -> Self {
        Self {
            bbox: item.bbox,
            class_name: item.class_name,
            score: item.score,
        }
    }
}

/// A word from the page's text layer, in the same space as the layout items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub bbox: BBox,
}

impl Word {
    pub fn new(text: impl Into<String>, bbox: BBox) -> Self {
        Self {
            text: text.into(),
            bbox,
        }
    }
}
