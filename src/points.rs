//! Point types and coordinate normalization.
//!
//! A [`PointSet`] is the output of one extraction pass over one frame, in
//! frame-pixel space. [`normalize`] maps a set into a unit-scaled space whose
//! origin is the minimum x / minimum y of the set and whose single isotropic
//! scale is derived from the vertical extent.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A marker location in frame-pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Both coordinates are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Points found in a single frame, in discovery order.
pub type PointSet = Vec<Point>;

/// Normalization errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("cannot normalize an empty point set")]
    EmptyInput,
    #[error("vertical extent {min_y}..{max_y} cannot be scaled to unit height")]
    DegenerateExtent { min_y: f64, max_y: f64 },
}

/// A point set rescaled into unit space, together with the transform used.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPointSet {
    pub points: PointSet,
    /// Origin subtracted from every point before scaling.
    pub origin: Point,
    /// `1 / (max_y - min_y)`, applied to both axes.
    pub scale: f64,
}

impl NormalizedPointSet {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Rescale `points` so that min y maps to 0 and max y maps to 1.
///
/// x is shifted by the minimum x and multiplied by the same scale, which
/// keeps the aspect ratio of a vertically arranged layout.
pub fn normalize(points: &[Point]) -> Result<NormalizedPointSet, NormalizeError> {
    let first = points.first().ok_or(NormalizeError::EmptyInput)?;

    let (mut min_x, mut min_y, mut max_y) = (first.x, first.y, first.y);
    for p in &points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }

    // a subnormal extent overflows the scale, an infinite one zeroes it
    let extent = max_y - min_y;
    let scale = 1.0 / extent;
    if extent == 0.0 || !extent.is_finite() || !scale.is_finite() || scale == 0.0 {
        return Err(NormalizeError::DegenerateExtent { min_y, max_y });
    }

    let normalized: PointSet = points
        .iter()
        .map(|p| Point::new((p.x - min_x) * scale, (p.y - min_y) * scale))
        .collect();
    if !normalized.iter().all(Point::is_finite) {
        return Err(NormalizeError::DegenerateExtent { min_y, max_y });
    }

    Ok(NormalizedPointSet {
        points: normalized,
        origin: Point::new(min_x, min_y),
        scale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_normalize_vertical_pair() {
        let pts = vec![Point::new(10.0, 20.0), Point::new(10.0, 120.0)];
        let result = normalize(&pts).unwrap();
        assert_eq!(result.points, vec![Point::new(0.0, 0.0), Point::new(0.0, 1.0)]);
        assert!(close(result.scale, 0.01));
        assert_eq!(result.origin, Point::new(10.0, 20.0));
    }

    #[test]
    fn test_normalize_shares_scale_across_axes() {
        let pts = vec![
            Point::new(50.0, 0.0),
            Point::new(250.0, 100.0),
            Point::new(150.0, 50.0),
        ];
        let result = normalize(&pts).unwrap();
        assert!(close(result.points[0].x, 0.0));
        assert!(close(result.points[1].x, 2.0));
        assert!(close(result.points[1].y, 1.0));
        assert!(close(result.points[2].x, 1.0));
        assert!(close(result.points[2].y, 0.5));
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(&[]), Err(NormalizeError::EmptyInput));
    }

    #[test]
    fn test_normalize_flat_row() {
        let pts = vec![Point::new(1.0, 7.0), Point::new(9.0, 7.0)];
        assert_eq!(
            normalize(&pts),
            Err(NormalizeError::DegenerateExtent { min_y: 7.0, max_y: 7.0 })
        );
    }

    #[test]
    fn test_normalize_rejects_unscalable_extent() {
        let tiny = vec![Point::new(0.0, 0.0), Point::new(1.0, 5e-324)];
        assert!(matches!(
            normalize(&tiny),
            Err(NormalizeError::DegenerateExtent { .. })
        ));

        let huge = vec![Point::new(0.0, -1e308), Point::new(3.0, 1e308)];
        assert!(matches!(
            normalize(&huge),
            Err(NormalizeError::DegenerateExtent { .. })
        ));
    }

    #[test]
    fn test_normalize_output_is_finite() {
        let pts = vec![Point::new(-1e300, -1e300), Point::new(1e300, 1e300)];
        let result = normalize(&pts).unwrap();
        assert!(result.points.iter().all(Point::is_finite));

        let wide = vec![Point::new(-1e308, 0.0), Point::new(1e308, 1e-10)];
        assert!(matches!(
            normalize(&wide),
            Err(NormalizeError::DegenerateExtent { .. })
        ));
    }

    #[test]
    fn test_normalize_single_point_is_degenerate() {
        let pts = vec![Point::new(3.0, 4.0)];
        assert!(matches!(
            normalize(&pts),
            Err(NormalizeError::DegenerateExtent { .. })
        ));
    }
}
