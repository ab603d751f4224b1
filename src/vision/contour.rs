//! Boundary geometry: vertex compression and polygon area moments.

use imageproc::point::Point as PixelPoint;

use crate::points::Point;

/// Zeroth and first order area moments of a closed boundary polygon.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Moments {
    /// Moments of the closed polygon `vertices` (Green's theorem).
    ///
    /// The result is orientation independent: a clockwise trace yields the
    /// same moments as the counter-clockwise one.
    pub fn of_polygon(vertices: &[Point]) -> Self {
        let n = vertices.len();
        let (mut a00, mut a10, mut a01) = (0.0, 0.0, 0.0);

        for i in 0..n {
            let p = vertices[i];
            let q = vertices[(i + 1) % n];
            let cross = p.x * q.y - q.x * p.y;
            a00 += cross;
            a10 += cross * (p.x + q.x);
            a01 += cross * (p.y + q.y);
        }

        let sign = if a00 < 0.0 { -1.0 } else { 1.0 };
        Self {
            m00: sign * a00 * 0.5,
            m10: sign * a10 / 6.0,
            m01: sign * a01 / 6.0,
        }
    }

    /// Zero-area boundaries (a lone pixel, a one-pixel-wide line).
    pub fn is_degenerate(&self) -> bool {
        self.m00.abs() < f64::EPSILON
    }

    /// `(m10 / m00, m01 / m00)`, or `None` for a degenerate boundary.
    pub fn centroid(&self) -> Option<Point> {
        if self.is_degenerate() {
            return None;
        }
        Some(Point::new(self.m10 / self.m00, self.m01 / self.m00))
    }
}

/// Keep only the boundary points where the trace changes direction.
///
/// The boundary is treated as closed. Horizontal, vertical and diagonal
/// runs collapse to their end points.
pub fn compress_boundary(points: &[PixelPoint<i32>]) -> Vec<Point> {
    let n = points.len();
    if n < 3 {
        return points.iter().map(to_point).collect();
    }

    let step = |a: &PixelPoint<i32>, b: &PixelPoint<i32>| (b.x - a.x, b.y - a.y);

    let vertices: Vec<Point> = (0..n)
        .filter(|&i| {
            let prev = &points[(i + n - 1) % n];
            let cur = &points[i];
            let next = &points[(i + 1) % n];
            step(prev, cur) != step(cur, next)
        })
        .map(|i| to_point(&points[i]))
        .collect();

    if vertices.is_empty() {
        points.iter().map(to_point).collect()
    } else {
        vertices
    }
}

fn to_point(p: &PixelPoint<i32>) -> Point {
    Point::new(p.x as f64, p.y as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(x: i32, y: i32) -> PixelPoint<i32> {
        PixelPoint::new(x, y)
    }

    #[test]
    fn test_square_moments() {
        let square = [
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 4.0),
            Point::new(0.0, 4.0),
        ];
        let m = Moments::of_polygon(&square);
        assert!((m.m00 - 16.0).abs() < 1e-9);
        assert_eq!(m.centroid(), Some(Point::new(2.0, 2.0)));
    }

    #[test]
    fn test_orientation_independent() {
        let ccw = [
            Point::new(1.0, 1.0),
            Point::new(5.0, 1.0),
            Point::new(5.0, 3.0),
            Point::new(1.0, 3.0),
        ];
        let mut cw = ccw;
        cw.reverse();
        assert_eq!(Moments::of_polygon(&ccw), Moments::of_polygon(&cw));
    }

    #[test]
    fn test_single_point_is_degenerate() {
        let m = Moments::of_polygon(&[Point::new(7.0, 3.0)]);
        assert!(m.is_degenerate());
        assert_eq!(m.centroid(), None);
    }

    #[test]
    fn test_line_is_degenerate() {
        let line = [px(0, 0), px(1, 0), px(2, 0), px(1, 0)];
        let vertices = compress_boundary(&line);
        assert_eq!(vertices, vec![Point::new(0.0, 0.0), Point::new(2.0, 0.0)]);
        assert!(Moments::of_polygon(&vertices).is_degenerate());
    }

    #[test]
    fn test_compress_square_trace() {
        let mut trace = Vec::new();
        for x in 0..3 {
            trace.push(px(x, 0));
        }
        for y in 0..3 {
            trace.push(px(3, y));
        }
        for x in (1..=3).rev() {
            trace.push(px(x, 3));
        }
        for y in (1..=3).rev() {
            trace.push(px(0, y));
        }
        let vertices = compress_boundary(&trace);
        assert_eq!(
            vertices,
            vec![
                Point::new(0.0, 0.0),
                Point::new(3.0, 0.0),
                Point::new(3.0, 3.0),
                Point::new(0.0, 3.0),
            ]
        );
    }
}
