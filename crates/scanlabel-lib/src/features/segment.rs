use crate::scan::{Point, Segment};

/// Default break distance between consecutive returns, in scan units.
pub const DEFAULT_BREAK_DISTANCE: f64 = 0.1;

fn distance(a: Point, b: Point) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// A return is usable when neither coordinate is zero, NaN, infinite or subnormal.
pub fn is_valid(p: Point) -> bool {
    (p[0] != 0.0 || p[1] != 0.0) && p[0].is_normal() && p[1].is_normal()
}

/// Split one frame into segments of consecutive returns closer than `threshold`.
///
/// The scan is circular: when the last valid return is within `threshold` of
/// the first, the trailing segment is joined in front of the leading one.
pub fn split_segments(points: &[Point], threshold: f64) -> Vec<Segment> {
    let valid: Vec<Point> = points.iter().copied().filter(|p| is_valid(*p)).collect();
    let (Some(&first), Some(&last)) = (valid.first(), valid.last()) else {
        return Vec::new();
    };

    let mut segments = Vec::new();
    let mut current = vec![first];
    for pair in valid.windows(2) {
        if distance(pair[0], pair[1]) >= threshold {
            segments.push(Segment::new(std::mem::take(&mut current)));
        }
        current.push(pair[1]);
    }
    segments.push(Segment::new(current));

    if segments.len() > 1 && distance(first, last) < threshold {
        if let Some(tail) = segments.pop() {
            let mut joined = tail.points;
            joined.extend_from_slice(&segments[0].points);
            segments[0] = Segment::new(joined);
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_gaps() {
        let pts = [[1.0, 1.0], [1.05, 1.0], [2.0, 1.0], [2.05, 1.0], [3.0, 3.0]];
        let segs = split_segments(&pts, 0.1);
        let lens: Vec<usize> = segs.iter().map(|s| s.len()).collect();
        assert_eq!(lens, vec![2, 2, 1]);
    }

    #[test]
    fn drops_invalid_returns() {
        let pts = [[0.0, 0.0], [1.0, 1.0], [f64::NAN, 1.0], [1.02, 1.0]];
        let segs = split_segments(&pts, 0.1);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].len(), 2);
    }

    #[test]
    fn wraps_last_segment_onto_first() {
        let pts = [[1.0, 1.0], [1.05, 1.0], [3.0, 3.0], [1.0, 1.05]];
        let segs = split_segments(&pts, 0.1);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].points, vec![[1.0, 1.05], [1.0, 1.0], [1.05, 1.0]]);
    }

    #[test]
    fn empty_frame_has_no_segments() {
        assert!(split_segments(&[[0.0, 0.0]; 4], 0.1).is_empty());
    }
}
