//! Per-frame segmentation and segment descriptors.

pub mod descriptors;
pub mod segment;

pub use descriptors::{describe, fit_circle, linearity, CircleFit, Linearity};
pub use segment::{split_segments, DEFAULT_BREAK_DISTANCE};

use crate::scan::{Extraction, Point};

/// Turns one frame of points into segments and their descriptors.
pub trait FeatureExtractor {
    fn extract(&self, points: &[Point]) -> Extraction;
}

/// Distance-break segmentation followed by the ten geometric descriptors.
#[derive(Debug, Clone, Copy)]
pub struct SegmentFeatures {
    pub break_distance: f64,
}

impl Default for SegmentFeatures {
    fn default() -> Self {
        Self {
            break_distance: DEFAULT_BREAK_DISTANCE,
        }
    }
}

impl FeatureExtractor for SegmentFeatures {
    fn extract(&self, points: &[Point]) -> Extraction {
        let segments = split_segments(points, self.break_distance);
        let features = segments.iter().map(describe).collect();
        Extraction { features, segments }
    }
}
