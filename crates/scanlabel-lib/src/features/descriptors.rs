use crate::scan::{FeatureRow, Point, Segment, FEATURE_WIDTH};

/// Fitted circle through a segment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CircleFit {
    pub radius: f64,
    /// Sum of squared radial residuals.
    pub circularity: f64,
    /// Distance from the sensor origin to the circle centre.
    pub center_distance: f64,
}

/// Extent of a segment along its principal axes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Linearity {
    pub long_side: f64,
    pub short_side: f64,
    pub area: f64,
    /// Mean squared distance to the principal line.
    pub residual: f64,
}

fn mean(points: &[Point]) -> Point {
    let n = points.len().max(1) as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    [sx / n, sy / n]
}

/// Sample standard deviation of the points around their centroid.
pub fn spread(points: &[Point]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(points);
    let ss: f64 = points
        .iter()
        .map(|p| (p[0] - m[0]).powi(2) + (p[1] - m[1]).powi(2))
        .sum();
    (ss / (n - 1) as f64).sqrt()
}

/// Distance between the first and last point.
pub fn width(points: &[Point]) -> f64 {
    match (points.first(), points.last()) {
        (Some(a), Some(b)) => ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt(),
        _ => 0.0,
    }
}

/// Solve a 3x3 system by Gaussian elimination with partial pivoting.
fn solve3(mut a: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<[f64; 3]> {
    let scale = a.iter().flatten().fold(0.0f64, |m, v| m.max(v.abs()));
    for col in 0..3 {
        let pivot = (col..3).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() <= 1e-12 * scale {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..3 {
            let factor = a[row][col] / a[col][col];
            for k in col..3 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = [0.0; 3];
    for row in (0..3).rev() {
        let tail: f64 = (row + 1..3).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

/// Algebraic least-squares circle fit: `x^2 + y^2 = 2*xc*x + 2*yc*y - c`.
///
/// Fewer than three points, or collinear points, give a zero radius circle at
/// the centroid.
pub fn fit_circle(points: &[Point]) -> CircleFit {
    let mut ata = [[0.0; 3]; 3];
    let mut atb = [0.0; 3];
    for p in points {
        let row = [-2.0 * p[0], -2.0 * p[1], 1.0];
        let rhs = -(p[0] * p[0] + p[1] * p[1]);
        for i in 0..3 {
            for j in 0..3 {
                ata[i][j] += row[i] * row[j];
            }
            atb[i] += row[i] * rhs;
        }
    }
    let solution = if points.len() >= 3 { solve3(ata, atb) } else { None };
    let Some([xc, yc, c]) = solution else {
        let m = mean(points);
        return CircleFit {
            radius: 0.0,
            circularity: 0.0,
            center_distance: (m[0] * m[0] + m[1] * m[1]).sqrt(),
        };
    };
    let radius = (xc * xc + yc * yc - c).max(0.0).sqrt();
    let circularity = points
        .iter()
        .map(|p| (radius - ((xc - p[0]).powi(2) + (yc - p[1]).powi(2)).sqrt()).powi(2))
        .sum();
    CircleFit {
        radius,
        circularity,
        center_distance: (xc * xc + yc * yc).sqrt(),
    }
}

/// Bounding box along the principal axes of the centred points.
pub fn linearity(points: &[Point]) -> Linearity {
    if points.len() < 2 {
        return Linearity::default();
    }
    let m = mean(points);
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let (dx, dy) = (p[0] - m[0], p[1] - m[1]);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let (sin, cos) = theta.sin_cos();

    let mut long = (f64::INFINITY, f64::NEG_INFINITY);
    let mut short = (f64::INFINITY, f64::NEG_INFINITY);
    let mut residual = 0.0;
    for p in points {
        let (dx, dy) = (p[0] - m[0], p[1] - m[1]);
        let along = dx * cos + dy * sin;
        let across = -dx * sin + dy * cos;
        long = (long.0.min(along), long.1.max(along));
        short = (short.0.min(across), short.1.max(across));
        residual += across * across;
    }
    let long_side = long.1 - long.0;
    let short_side = short.1 - short.0;
    Linearity {
        long_side,
        short_side,
        area: long_side * short_side,
        residual: residual / points.len() as f64,
    }
}

/// The ten-value descriptor of one segment.
pub fn describe(segment: &Segment) -> FeatureRow {
    let points = &segment.points;
    let circle = fit_circle(points);
    let line = linearity(points);
    let row: [f64; FEATURE_WIDTH] = [
        points.len() as f64,
        spread(points),
        width(points),
        circle.radius,
        circle.circularity,
        circle.center_distance,
        line.long_side,
        line.short_side,
        line.area,
        line.residual,
    ];
    row
}
