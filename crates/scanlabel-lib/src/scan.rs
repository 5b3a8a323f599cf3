use serde::{Deserialize, Serialize};

/// Number of values in one segment descriptor.
pub const FEATURE_WIDTH: usize = 10;

/// One 2-D laser return.
pub type Point = [f64; 2];

/// Fixed-width descriptor of one segment.
pub type FeatureRow = [f64; FEATURE_WIDTH];

/// Segment labels are 0 (background) or 1 (target).
pub fn is_valid_label(value: i32) -> bool {
    matches!(value, 0 | 1)
}

/// Contiguous run of points judged to belong to one object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Segment {
    pub points: Vec<Point>,
}

impl Segment {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn centroid(&self) -> Point {
        if self.points.is_empty() {
            return [0.0, 0.0];
        }
        let n = self.points.len() as f64;
        let (sx, sy) = self
            .points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
        [sx / n, sy / n]
    }
}

/// Output of feature extraction for one frame. `features[i]` describes `segments[i]`.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub features: Vec<FeatureRow>,
    pub segments: Vec<Segment>,
}

impl Extraction {
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

/// Axis-aligned selection rectangle in scan coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Rect {
    /// Build from two opposite corners in any order.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x_min: a[0].min(b[0]),
            y_min: a[1].min(b[1]),
            x_max: a[0].max(b[0]),
            y_max: a[1].max(b[1]),
        }
    }

    /// Strict containment; points on the border are outside.
    pub fn contains(&self, p: Point) -> bool {
        self.x_min < p[0] && p[0] < self.x_max && self.y_min < p[1] && p[1] < self.y_max
    }
}
